//! TLS context construction: SSLv23-method contexts with SSLv2/v3 and
//! compression disabled, server cert/key loading, client CA/mTLS material,
//! SNI, and a verify callback that logs rejection details (§6 "TLS").
//! Per-connection handshake continuation itself lives on
//! [`crate::net::tcp_connection::TcpConnection`]; this module only builds
//! the `Ssl`/`SslContext` handed to it.

use openssl::ssl::{SslContext, SslContextBuilder, SslFiletype, SslMethod, SslOptions, SslVerifyMode};

use crate::config::{ClientTlsConfig, ServerTlsConfig};
use crate::error::Result;

fn base_builder() -> Result<SslContextBuilder> {
    let mut builder = SslContextBuilder::new(SslMethod::tls())?;
    // SSLv23-method context with the legacy protocols and compression
    // disabled, matching §6's "SSLv2/v3 and compression disabled".
    builder.set_options(
        SslOptions::NO_SSLV2 | SslOptions::NO_SSLV3 | SslOptions::NO_COMPRESSION,
    );
    Ok(builder)
}

/// One context per listening `TcpServer`, shared across every accepted
/// connection's `Ssl::new`.
pub fn server_context(config: &ServerTlsConfig) -> Result<SslContext> {
    let mut builder = base_builder()?;
    builder.set_certificate_file(&config.cert_path, SslFiletype::PEM)?;
    builder.set_private_key_file(&config.key_path, SslFiletype::PEM)?;
    builder.check_private_key()?;
    Ok(builder.build())
}

/// One context per `TcpClient`. Defaults to system CA verification; a
/// custom CA file/dir and a client certificate/key enable mTLS.
pub fn client_context(config: &ClientTlsConfig) -> Result<SslContext> {
    let mut builder = base_builder()?;

    builder.set_verify_callback(SslVerifyMode::PEER, |ok, ctx| {
        if !ok {
            log::warn!(
                "tls: peer certificate verification failed: {}",
                ctx.error().error_string()
            );
        }
        ok
    });

    match (&config.ca_file, &config.ca_path) {
        (None, None) => builder.set_default_verify_paths()?,
        _ => builder.load_verify_locations(config.ca_file.as_deref(), config.ca_path.as_deref())?,
    }

    if let (Some(cert), Some(key)) = (&config.client_cert, &config.client_key) {
        builder.set_certificate_file(cert, SslFiletype::PEM)?;
        builder.set_private_key_file(key, SslFiletype::PEM)?;
        builder.check_private_key()?;
    }

    Ok(builder.build())
}

/// Builds the per-connection `Ssl` object for a client handshake, setting
/// SNI from `config.sni` when present (§6 "SNI is set on the client
/// handshake").
pub fn client_ssl(ctx: &SslContext, config: &ClientTlsConfig) -> Result<openssl::ssl::Ssl> {
    let mut ssl = openssl::ssl::Ssl::new(ctx)?;
    if let Some(sni) = &config.sni {
        ssl.set_hostname(sni)?;
    }
    Ok(ssl)
}

pub fn server_ssl(ctx: &SslContext) -> Result<openssl::ssl::Ssl> {
    Ok(openssl::ssl::Ssl::new(ctx)?)
}
