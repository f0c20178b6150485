//! Centralized (web) client creation for the HTTP based backends.

use std::sync::Arc;

use rama::{
    Layer as _, Service as _,
    error::{BoxError, ErrorContext as _},
    http::{
        HeaderValue, Request, Response, Version, client::EasyHttpWebClient,
        layer::required_header::AddRequiredRequestHeadersLayer,
    },
    net::tls::client::ServerVerifyMode,
    service::BoxService,
    telemetry::tracing,
    tls::boring::client::TlsConnectorDataBuilder,
};

use crate::utils::env::network_service_identifier;

/// Create a new web client that can be cloned and shared.
///
/// With `insecure` enabled the server certificate is not verified,
/// meant for self-signed backends in test clusters.
pub fn new_web_client(insecure: bool) -> Result<BoxService<Request, Response, BoxError>, BoxError> {
    let tls_config = insecure.then(|| {
        tracing::info!("turning off TLS certificate verification for backend web client");
        Arc::new(
            TlsConnectorDataBuilder::new_http_auto()
                .with_server_verify_mode(ServerVerifyMode::Disable),
        )
    });

    let inner_https_client = EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        // fallback to HTTP/1.1 as default HTTP version in case
        // no protocol negotation happens on layers such as TLS (e.g. ALPN)
        .with_tls_support_using_boringssl_and_default_http_version(tls_config, Version::HTTP_11)
        .with_default_http_connector()
        .try_with_default_connection_pool()
        .context("create connection pool for backend web client")?
        .build_client();

    Ok(AddRequiredRequestHeadersLayer::new()
        .with_user_agent_header_value(HeaderValue::from_static(network_service_identifier()))
        .into_layer(inner_https_client)
        .boxed())
}
