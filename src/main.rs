use anyhow::{Context, Result};
use clap::Parser;
use epp_relay::cli::{Cli, Commands};
use epp_relay::config::{RelayConfig, CONFIG_TEMPLATE};
use epp_relay::hooks::Passthrough;
use epp_relay::{server, tls};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level, RUST_LOG takes precedence
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match &cli.command {
        Commands::Run { config } => {
            info!("EPP Relay v{}", env!("CARGO_PKG_VERSION"));
            info!("Loading relay configuration from: {}", config);
            let relay_config = RelayConfig::load(config)?;

            // 独立运行时不做任何改写
            server::run_relay(relay_config, Arc::new(Passthrough)).await?;
        }
        Commands::Check { config } => check_config(config)?,
        Commands::Template { output } => generate_config_template(output.as_deref())?,
        Commands::Cert {
            cert_out,
            key_out,
            common_name,
            alt_names,
        } => generate_certificate(cert_out, key_out, common_name, alt_names)?,
    }

    Ok(())
}

/// Generate configuration template
fn generate_config_template(output: Option<&str>) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write config template to {}", path))?;
        println!("Generated relay configuration template: {}", path);
    } else {
        println!("{}", CONFIG_TEMPLATE);
    }

    Ok(())
}

/// Generate self-signed TLS certificate
fn generate_certificate(
    cert_out: &str,
    key_out: &str,
    common_name: &str,
    alt_names: &[String],
) -> Result<()> {
    tls::generate_self_signed_cert(
        common_name,
        alt_names,
        Path::new(cert_out),
        Path::new(key_out),
    )?;

    println!("Generated self-signed certificate: {}", cert_out);
    println!("Generated private key: {}", key_out);

    Ok(())
}

/// Check configuration file format
fn check_config(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", config_path);
    }

    println!("Checking configuration file: {}\n", config_path);

    let config = match RelayConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("✗ Configuration validation failed!");
            println!("\nError details:");
            println!("{:#}", e);

            println!("\nCommon issues:");
            println!("  1. Check TOML syntax (brackets, quotes, commas)");
            println!("  2. [remote] section with remote_server is required");
            println!("  3. Ensure port numbers are valid (1-65535)");
            println!("  4. listen.cert_path and listen.key_path must be set together");

            return Err(e);
        }
    };

    println!("✓ Listen address: {}", config.listen.addr());
    match config.listen.tls_identity() {
        Some((cert, key)) => {
            println!("✓ Client side: TLS");
            report_file("Listen certificate", cert);
            report_file("Listen key", key);
        }
        None => println!("✓ Client side: plain TCP"),
    }

    println!("✓ Upstream: {}", config.remote.endpoint());
    println!("✓ Verify name: {}", config.remote.verify_name());
    match config.remote.ca_cert_path {
        Some(ref ca) => report_file("CA certificate", ca),
        None => println!("✓ Trust roots: system certificates"),
    }
    match config.remote.client_identity() {
        Some((cert, key)) => {
            println!("✓ Mutual TLS: enabled");
            report_file("Client certificate", cert);
            report_file("Client key", key);
        }
        None if config.remote.remote_cert.is_some() || config.remote.remote_key.is_some() => {
            println!("⚠ Warning: only one of remote_cert/remote_key is set, mutual TLS disabled");
        }
        None => println!("✓ Mutual TLS: disabled"),
    }

    println!("✓ Max frame size: {} bytes", config.limits.max_frame_size);
    match config.limits.io_timeout() {
        Some(timeout) => println!("✓ I/O timeout: {:?}", timeout),
        None => println!("✓ I/O timeout: none"),
    }

    println!("\n✓ Relay configuration is valid!");
    Ok(())
}

fn report_file(label: &str, path: &Path) {
    if path.exists() {
        println!("✓ {}: {:?}", label, path);
    } else {
        println!("⚠ Warning: {} file not found: {:?}", label, path);
    }
}
