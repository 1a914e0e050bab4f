use esp_idf_svc::http::server::Configuration;

/// HTTP server configuration sized for the handful of OTA API routes
pub fn create_http_config() -> Configuration {
    Configuration {
        stack_size: 8192,        // Handlers serialize JSON on this stack
        max_uri_handlers: 8,
        max_open_sockets: 4,     // LWIP allows max 10; downloads need a socket too
        max_resp_headers: 8,

        // Enable LRU purging to automatically close old connections
        lru_purge_enable: true,

        // Needed for the "/*" fallback route
        uri_match_wildcard: true,

        ..Default::default()
    }
}
