pub const fn project_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

/// Identifier used as the `User-Agent` of outgoing backend requests.
pub const fn network_service_identifier() -> &'static str {
    concat!("loggen/", env!("CARGO_PKG_VERSION"))
}
