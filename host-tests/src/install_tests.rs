use std::time::Duration;

use proptest::prelude::*;
use ota_core::{InstallStep, OtaError, UpdateStateMachine, UpdateStatus};

use crate::fakes::*;

type Machine = UpdateStateMachine<ScriptedTransport, MemoryFlash, RecordingSystem>;

struct Rig {
    machine: Machine,
    flash: MemoryFlash,
    system: RecordingSystem,
}

/// A machine whose first check finds `v2.0.0` at [`FIRMWARE_URL`].
fn rig_with_flash(flash: MemoryFlash, firmware: Vec<ScriptedResponse>) -> Rig {
    let body = release_json("v2.0.0", &[("firmware-v2.0.0.bin", FIRMWARE_URL)]);
    let mut transport = ScriptedTransport::new().on(METADATA_URL, ScriptedResponse::ok(body));
    for response in firmware {
        transport.push(FIRMWARE_URL, response);
    }

    let system = RecordingSystem::new();
    let mut machine = UpdateStateMachine::new(&test_config(), transport, flash.clone(), system.clone());
    machine.trigger_check().unwrap();
    assert!(machine.session().can_install());
    Rig { machine, flash, system }
}

fn rig(firmware: Vec<ScriptedResponse>) -> Rig {
    rig_with_flash(MemoryFlash::new(1 << 20), firmware)
}

fn assert_failed_safely(rig: &Rig) {
    let session = rig.machine.session();
    assert_eq!(session.status(), UpdateStatus::Error);
    assert!(!session.update_available());
    assert_eq!(session.current_version().as_str(), "1.0.0");
    assert_eq!(rig.flash.committed(), None);
    assert_eq!(rig.flash.open_regions(), 0);
    assert!(rig.system.restarts().is_empty());
    assert!(!rig.machine.transport().is_open());
}

#[test]
fn successful_install_commits_and_restarts() {
    let image = firmware_image(37);
    let mut rig = rig(vec![ScriptedResponse::ok(image.clone())]);

    let committed = rig.machine.install_latest_release().unwrap();
    assert_eq!(committed.bytes, 37);
    assert_eq!(committed.sha256.len(), 64);

    assert_eq!(rig.flash.opened_sizes(), vec![37]);
    assert_eq!(rig.flash.committed(), Some(image));
    assert_eq!(rig.system.restarts(), vec![Duration::from_millis(2000)]);

    let report = rig.machine.board().snapshot();
    assert_eq!(report.status, UpdateStatus::Success);
    assert_eq!(report.message, "Update successful! Rebooting...");
    assert_eq!(report.progress, 100);
    assert!(!report.update_available);
}

#[test]
fn install_walks_through_download_and_install_states() {
    let mut rig = rig(vec![ScriptedResponse::ok(firmware_image(16))]);

    rig.machine.begin_install().unwrap();
    assert_eq!(rig.machine.status(), UpdateStatus::Installing);
    assert_eq!(rig.machine.session().message(), "Installing firmware...");
    assert!(rig.machine.install_in_flight());

    assert_eq!(
        rig.machine.step_install(),
        Some(InstallStep::Running { written: 4, expected: 16 })
    );
    assert_eq!(rig.machine.board().snapshot().progress, 25);

    let mut steps = 1;
    let result = loop {
        match rig.machine.step_install() {
            Some(InstallStep::Running { .. }) => steps += 1,
            Some(InstallStep::Finished(result)) => break result,
            None => panic!("install vanished"),
        }
    };
    assert_eq!(steps, 4);
    assert!(result.is_ok());
    assert_eq!(rig.machine.step_install(), None);
}

#[test]
fn redirect_to_storage_host_is_followed() {
    let storage_url = "https://objects.test/blob/fw?sig=abc";
    let image = firmware_image(10);
    let body = release_json("v2.0.0", &[("firmware.bin", FIRMWARE_URL)]);
    let transport = ScriptedTransport::new()
        .on(METADATA_URL, ScriptedResponse::ok(body))
        .on(FIRMWARE_URL, ScriptedResponse::redirect(302, storage_url))
        .on(storage_url, ScriptedResponse::ok(image.clone()));
    let flash = MemoryFlash::new(1024);
    let mut machine = UpdateStateMachine::new(&test_config(), transport, flash.clone(), RecordingSystem::new());

    machine.trigger_check().unwrap();
    machine.install_latest_release().unwrap();

    assert_eq!(
        machine.transport().request_urls(),
        vec![METADATA_URL, FIRMWARE_URL, storage_url]
    );
    for request in &machine.transport().requests()[1..] {
        assert_eq!(request.header("User-Agent"), Some("ESP32-GarageDoor-OTA"));
    }
    assert_eq!(flash.committed(), Some(image));
}

#[test]
fn relative_redirect_resolves_against_current_host() {
    let resolved = "https://github.test/assets/fw.bin";
    let body = release_json("v2.0.0", &[("firmware.bin", FIRMWARE_URL)]);
    let transport = ScriptedTransport::new()
        .on(METADATA_URL, ScriptedResponse::ok(body))
        .on(FIRMWARE_URL, ScriptedResponse::redirect(301, "/assets/fw.bin"))
        .on(resolved, ScriptedResponse::ok(firmware_image(8)));
    let mut machine = UpdateStateMachine::new(&test_config(), transport, MemoryFlash::new(64), RecordingSystem::new());

    machine.trigger_check().unwrap();
    assert!(machine.install_latest_release().is_ok());
    assert_eq!(machine.transport().request_urls()[2], resolved);
}

#[test]
fn dot_segment_redirect_is_normalised() {
    let resolved = "https://github.test/acme/door/releases/fw.bin";
    let mut rig = rig(vec![ScriptedResponse::redirect(302, "../../fw.bin")]);
    rig.machine
        .transport_mut()
        .push(resolved, ScriptedResponse::ok(firmware_image(8)));

    assert!(rig.machine.install_latest_release().is_ok());
    assert_eq!(rig.machine.transport().request_urls()[2], resolved);
}

#[test]
fn redirect_to_query_keeps_path() {
    let resolved = format!("{}?token=t1", FIRMWARE_URL);
    let mut rig = rig(vec![ScriptedResponse::redirect(302, "?token=t1")]);
    rig.machine
        .transport_mut()
        .push(&resolved, ScriptedResponse::ok(firmware_image(8)));

    assert!(rig.machine.install_latest_release().is_ok());
    assert_eq!(rig.machine.transport().request_urls()[2], resolved);
}

#[test]
fn redirect_loop_is_bounded() {
    let responses = (0..10)
        .map(|_| ScriptedResponse::redirect(302, FIRMWARE_URL))
        .collect();
    let mut rig = rig(responses);

    assert_eq!(
        rig.machine.install_latest_release(),
        Err(OtaError::DownloadError(302))
    );
    // metadata + first request + five redirects
    assert_eq!(rig.machine.transport().requests().len(), 7);
    assert!(rig.flash.opened_sizes().is_empty());
    assert_failed_safely(&rig);
}

#[test]
fn redirect_without_location_fails() {
    let mut rig = rig(vec![ScriptedResponse::status(302)]);
    assert_eq!(
        rig.machine.install_latest_release(),
        Err(OtaError::DownloadError(302))
    );
    assert_failed_safely(&rig);
}

#[test]
fn download_http_error() {
    let mut rig = rig(vec![ScriptedResponse::status(404)]);
    assert_eq!(
        rig.machine.install_latest_release(),
        Err(OtaError::DownloadError(404))
    );
    assert_eq!(rig.machine.session().message(), "Download failed: 404");
    assert_failed_safely(&rig);
}

#[test]
fn zero_length_fails_before_opening_region() {
    let mut rig = rig(vec![ScriptedResponse::ok(Vec::new())]);
    assert_eq!(rig.machine.install_latest_release(), Err(OtaError::UnknownSize));
    assert!(rig.flash.opened_sizes().is_empty());
    assert_failed_safely(&rig);
}

#[test]
fn missing_length_fails_before_opening_region() {
    let mut rig = rig(vec![ScriptedResponse::ok(firmware_image(32)).with_content_length(None)]);
    assert_eq!(rig.machine.install_latest_release(), Err(OtaError::UnknownSize));
    assert!(rig.flash.opened_sizes().is_empty());
    assert_failed_safely(&rig);
}

#[test]
fn image_larger_than_slot() {
    let mut rig = rig_with_flash(MemoryFlash::new(16), vec![ScriptedResponse::ok(firmware_image(17))]);
    assert_eq!(
        rig.machine.install_latest_release(),
        Err(OtaError::InsufficientSpace)
    );
    assert_eq!(rig.machine.session().message(), "Not enough space for update");
    assert_failed_safely(&rig);
}

#[test]
fn unavailable_partition_reports_no_space() {
    let flash = MemoryFlash::new(1024).unavailable("no OTA partition found");
    let mut rig = rig_with_flash(flash, vec![ScriptedResponse::ok(firmware_image(12))]);
    assert_eq!(
        rig.machine.install_latest_release(),
        Err(OtaError::InsufficientSpace)
    );
    assert_eq!(rig.machine.session().message(), "Not enough space for update");
    assert!(rig.flash.opened_sizes().is_empty());
    assert_failed_safely(&rig);
}

#[test]
fn short_body_is_partial_write() {
    let mut rig = rig(vec![
        ScriptedResponse::ok(firmware_image(6)).with_content_length(Some(10))
    ]);
    assert_eq!(
        rig.machine.install_latest_release(),
        Err(OtaError::PartialWrite { written: 6, expected: 10 })
    );
    assert_eq!(rig.machine.session().message(), "Partial update: 6/10");
    assert_eq!(rig.flash.aborted(), 1);
    assert_failed_safely(&rig);
}

#[test]
fn dropped_connection_is_partial_write() {
    let mut rig = rig(vec![ScriptedResponse::ok(firmware_image(20)).failing_at(9)]);
    assert_eq!(
        rig.machine.install_latest_release(),
        Err(OtaError::PartialWrite { written: 9, expected: 20 })
    );
    assert_eq!(rig.flash.aborted(), 1);
    assert_failed_safely(&rig);
}

#[test]
fn flash_write_error_is_partial_write() {
    let flash = MemoryFlash::new(1024).failing_writes_after(8);
    let mut rig = rig_with_flash(flash, vec![ScriptedResponse::ok(firmware_image(20))]);
    assert_eq!(
        rig.machine.install_latest_release(),
        Err(OtaError::PartialWrite { written: 8, expected: 20 })
    );
    assert_failed_safely(&rig);
}

#[test]
fn commit_failure_keeps_old_image() {
    let flash = MemoryFlash::new(1024).failing_commit("image header invalid");
    let mut rig = rig_with_flash(flash, vec![ScriptedResponse::ok(firmware_image(12))]);
    assert_eq!(
        rig.machine.install_latest_release(),
        Err(OtaError::CommitFailure("image header invalid".to_string()))
    );
    assert_eq!(rig.machine.session().message(), "Update failed: image header invalid");
    assert_failed_safely(&rig);
}

fn digest_release(digest: &str) -> Vec<u8> {
    serde_json::json!({
        "tag_name": "v2.0.0",
        "assets": [{
            "name": "firmware.bin",
            "browser_download_url": FIRMWARE_URL,
            "digest": digest,
        }]
    })
    .to_string()
    .into_bytes()
}

#[test]
fn published_digest_is_enforced() {
    let image = b"abc".to_vec();
    // SHA-256("abc")
    let good = "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    let flash = MemoryFlash::new(64);
    let transport = ScriptedTransport::new()
        .on(METADATA_URL, ScriptedResponse::ok(digest_release(good)))
        .on(FIRMWARE_URL, ScriptedResponse::ok(image.clone()));
    let mut machine = UpdateStateMachine::new(&test_config(), transport, flash.clone(), RecordingSystem::new());
    machine.trigger_check().unwrap();
    assert!(machine.install_latest_release().is_ok());
    assert_eq!(flash.committed(), Some(image.clone()));

    let bad = format!("sha256:{}", "0".repeat(64));
    let flash = MemoryFlash::new(64);
    let transport = ScriptedTransport::new()
        .on(METADATA_URL, ScriptedResponse::ok(digest_release(&bad)))
        .on(FIRMWARE_URL, ScriptedResponse::ok(image));
    let mut machine = UpdateStateMachine::new(&test_config(), transport, flash.clone(), RecordingSystem::new());
    machine.trigger_check().unwrap();
    assert!(matches!(
        machine.install_latest_release(),
        Err(OtaError::DigestMismatch { .. })
    ));
    assert_eq!(flash.committed(), None);
    assert_eq!(flash.aborted(), 1);
    assert_eq!(machine.status(), UpdateStatus::Error);
}

#[test]
fn install_without_pending_update_is_rejected() {
    let mut machine = UpdateStateMachine::new(
        &test_config(),
        ScriptedTransport::new(),
        MemoryFlash::new(64),
        RecordingSystem::new(),
    );
    let before = machine.report();

    assert_eq!(machine.install_latest_release(), Err(OtaError::NoPendingUpdate));
    assert_eq!(machine.report(), before);
    assert!(machine.transport().requests().is_empty());
}

#[test]
fn triggers_while_busy_are_rejected() {
    let mut rig = rig(vec![ScriptedResponse::ok(firmware_image(12))]);
    rig.machine.begin_install().unwrap();
    let before = rig.machine.report();
    let requests = rig.machine.transport().requests().len();

    assert_eq!(rig.machine.trigger_check(), Err(OtaError::AlreadyInProgress));
    assert_eq!(rig.machine.begin_install(), Err(OtaError::AlreadyInProgress));
    assert_eq!(rig.machine.install_latest_release(), Err(OtaError::AlreadyInProgress));
    assert_eq!(rig.machine.report(), before);
    assert_eq!(rig.machine.transport().requests().len(), requests);

    while let Some(InstallStep::Running { .. }) = rig.machine.step_install() {}
    assert_eq!(rig.machine.status(), UpdateStatus::Success);
}

#[test]
fn error_status_clears_on_next_check() {
    let mut rig = rig(vec![ScriptedResponse::status(500)]);
    assert!(rig.machine.install_latest_release().is_err());
    assert_eq!(rig.machine.status(), UpdateStatus::Error);

    let body = release_json("1.0.0", &[]);
    rig.machine
        .transport_mut()
        .push(METADATA_URL, ScriptedResponse::ok(body));
    assert!(rig.machine.trigger_check().is_ok());
    assert_eq!(rig.machine.status(), UpdateStatus::Idle);
    assert_eq!(rig.machine.session().message(), "Firmware up to date");
}

#[test]
fn abandoned_install_releases_region() {
    let mut rig = rig(vec![ScriptedResponse::ok(firmware_image(12))]);
    rig.machine.begin_install().unwrap();
    rig.machine.step_install();
    assert_eq!(rig.flash.open_regions(), 1);

    drop(rig.machine);
    assert_eq!(rig.flash.open_regions(), 0);
    assert_eq!(rig.flash.aborted(), 1);
    assert_eq!(rig.flash.committed(), None);
}

proptest! {
    #[test]
    fn any_short_body_is_partial_write(declared in 1usize..64, cut in 0usize..64) {
        let delivered = cut % declared;
        let mut rig = rig(vec![
            ScriptedResponse::ok(firmware_image(delivered)).with_content_length(Some(declared as u64))
        ]);

        prop_assert_eq!(
            rig.machine.install_latest_release(),
            Err(OtaError::PartialWrite { written: delivered as u64, expected: declared as u64 })
        );
        prop_assert_eq!(rig.flash.committed(), None);
        prop_assert!(rig.system.restarts().is_empty());
        prop_assert_eq!(rig.flash.open_regions(), 0);
        prop_assert_eq!(rig.machine.status(), UpdateStatus::Error);
    }
}
