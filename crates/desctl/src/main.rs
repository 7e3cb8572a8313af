use std::path::PathBuf;
use std::sync::Once;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{well_known, DataEncryptionServiceConfiguration, ErrorCode, HashMethod, TextMap};
use encryption::generate_aes_key;
use orchestrator::{
    CancellationToken, EncryptRequest, LabeledItemSet, LabeledResult, ProtectionOrchestrator,
    RotateKeyRequest,
};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format = std::env::var("DES_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter.clone())
                .with_target(true)
                .with_writer(std::io::stderr)
                .json()
                .flatten_event(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .init();
        }
    });
}

#[derive(Parser)]
#[command(name = "desctl")]
#[command(about = "Data encryption service control utility", long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); DES_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt named values and store them under a new label
    Encrypt {
        /// Item as name=value; repeatable
        #[arg(short, long = "item", value_parser = parse_item, required = true)]
        items: Vec<(String, String)>,
        /// Tag attached to the stored record; repeatable
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Lookup hash method (name or numeric id)
        #[arg(long)]
        hash: Option<HashMethod>,
    },
    /// Decrypt items of a label
    Decrypt {
        #[arg(short, long)]
        label: String,
        /// Item name or item hash; all items when omitted
        #[arg(short, long = "item")]
        items: Vec<String>,
    },
    /// Delete labeled values
    Delete {
        #[arg(short, long = "label", required = true)]
        labels: Vec<String>,
    },
    /// Re-encrypt stored values under the newest key version
    RotateKey {
        #[arg(long)]
        key_scope: String,
        #[arg(long)]
        key_name: String,
        /// Engine id; the transit engine when omitted
        #[arg(long)]
        engine_id: Option<Uuid>,
        /// Resume after this label
        #[arg(long)]
        from_label: Option<String>,
        /// Only records encrypted at or after this RFC 3339 instant
        #[arg(long, value_parser = parse_timestamp)]
        from_encrypted_on: Option<OffsetDateTime>,
        /// Suppress per-record progress lines
        #[arg(short, long)]
        quiet: bool,
    },
    /// Print fresh AES-256 key material for the configuration
    GenerateAesKey,
}

fn parse_item(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

fn parse_timestamp(raw: &str) -> std::result::Result<OffsetDateTime, String> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| format!("invalid RFC 3339 time: {err}"))
}

fn build_orchestrator(config: Option<PathBuf>) -> Result<ProtectionOrchestrator> {
    let config = DataEncryptionServiceConfiguration::load(config.as_deref())
        .context("failed to load configuration")?;
    if storage_is_ephemeral(&config) {
        tracing::warn!(
            provider = well_known::IN_MEMORY_PROVIDER_NAME,
            "records live in process memory and are lost when desctl exits; configure the file storage provider to keep them"
        );
    }
    ProtectionOrchestrator::from_config(config).context("failed to initialise the service")
}

/// The in-memory provider cannot outlive a single CLI invocation.
fn storage_is_ephemeral(config: &DataEncryptionServiceConfiguration) -> bool {
    config.storage.storage_provider == well_known::IN_MEMORY_PROVIDER_ID
}

fn fail(code: ErrorCode, message: Option<&str>) -> anyhow::Error {
    anyhow!(
        "{} ({}): {}",
        code.name(),
        code.as_u32(),
        message.unwrap_or("no detail")
    )
}

fn print_failures(results: &[LabeledResult]) {
    for result in results.iter().filter(|result| result.is_error()) {
        eprintln!(
            "{}\t{}\t{}",
            result.label,
            result.code.name(),
            result.message.as_deref().unwrap_or_default()
        );
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::GenerateAesKey = cli.command {
        let generated = generate_aes_key();
        println!("Key: {}", generated.key.as_str());
        println!("IV: {}", generated.iv);
        return Ok(());
    }

    let service = build_orchestrator(cli.config)?;

    match cli.command {
        Commands::Encrypt { items, tags, hash } => {
            let mut request = EncryptRequest::new(items.into_iter().collect::<TextMap>());
            request.tags = tags.into_iter().collect();
            request.hash_method = hash;

            let response = service.encrypt(request).await;
            if !response.is_success() {
                return Err(fail(response.code, response.message.as_deref()));
            }
            println!("Label: {}", response.label.unwrap_or_default());
            for (name, value) in &response.items {
                println!("{}\t{}", name, value.hash.as_deref().unwrap_or("-"));
            }
        }
        Commands::Decrypt { label, items } => {
            let response = service
                .decrypt(Some(vec![LabeledItemSet::new(label, items)]))
                .await;
            if !response.code.is_none() {
                return Err(fail(response.code, response.message.as_deref()));
            }
            for result in &response.results {
                for (name, value) in result.data.iter().flatten() {
                    println!("{name}\t{value}");
                }
            }
            if response.has_errors {
                print_failures(&response.results);
                bail!("{}", response.message.unwrap_or_default());
            }
        }
        Commands::Delete { labels } => {
            let response = service.delete(labels).await;
            for result in response.results.iter().filter(|result| !result.is_error()) {
                println!("Deleted {}", result.label);
            }
            if response.has_errors {
                print_failures(&response.results);
                bail!("{}", response.message.unwrap_or_default());
            }
        }
        Commands::RotateKey {
            key_scope,
            key_name,
            engine_id,
            from_label,
            from_encrypted_on,
            quiet,
        } => {
            let request = RotateKeyRequest {
                engine_id,
                key_name,
                key_scope,
                starting_after_label: from_label,
                encrypted_on_or_after: from_encrypted_on,
            };

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received; stopping after the current record");
                    on_interrupt.cancel();
                }
            });

            let progress = |label: &str, version: u32, code: ErrorCode, message: &str| {
                if !quiet {
                    println!(
                        "Finished Processing Label {label} from version {version}. Error Code: {}, Error Message: {message}",
                        code.name()
                    );
                }
            };
            let response = service.rotate_key(request, Some(&progress), &cancel).await;
            if !response.code.is_none() {
                return Err(fail(response.code, response.message.as_deref()));
            }
            println!(
                "Processed: {}, Re-encrypted: {}, Failed: {}",
                response.processed, response.reencrypted, response.failed
            );
            if let Some(label) = &response.last_label {
                println!("Last label: {label}");
            }
            if response.cancelled {
                println!("Cancelled; resume with --from-label to continue.");
            }
            if response.has_warnings {
                eprintln!("Some re-encrypted records could not be saved.");
            }
        }
        Commands::GenerateAesKey => {}
    }

    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let rt = Runtime::new()?;
    rt.block_on(run(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_storage_is_flagged_as_ephemeral() {
        let mut config = DataEncryptionServiceConfiguration::default();
        assert!(storage_is_ephemeral(&config));

        config.storage.storage_provider = well_known::FILE_PROVIDER_ID;
        assert!(!storage_is_ephemeral(&config));
    }

    #[test]
    fn item_splits_on_first_equals() {
        assert_eq!(
            parse_item("token=a=b").unwrap(),
            ("token".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_item("empty=").unwrap().1, "");
        assert!(parse_item("=value").is_err());
        assert!(parse_item("novalue").is_err());
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let parsed = parse_timestamp("2024-05-01T12:00:00Z").unwrap();
        assert_eq!(parsed.year(), 2024);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn rotate_key_arguments() {
        let cli = Cli::try_parse_from([
            "desctl",
            "--config",
            "des.toml",
            "rotate-key",
            "--key-scope",
            "transit",
            "--key-name",
            "orders",
            "--from-label",
            "abc",
            "--quiet",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("des.toml")));
        match cli.command {
            Commands::RotateKey {
                key_scope,
                key_name,
                engine_id,
                from_label,
                quiet,
                ..
            } => {
                assert_eq!(key_scope, "transit");
                assert_eq!(key_name, "orders");
                assert_eq!(engine_id, None);
                assert_eq!(from_label.as_deref(), Some("abc"));
                assert!(quiet);
            }
            _ => panic!("expected rotate-key"),
        }
    }

    #[test]
    fn encrypt_arguments() {
        let cli = Cli::try_parse_from([
            "desctl", "encrypt", "-i", "A=hello", "--item", "B=x", "--hash", "sha2_256",
        ])
        .unwrap();
        match cli.command {
            Commands::Encrypt { items, hash, tags } => {
                assert_eq!(items.len(), 2);
                assert_eq!(hash, Some(HashMethod::Sha2_256));
                assert!(tags.is_empty());
            }
            _ => panic!("expected encrypt"),
        }
        assert!(Cli::try_parse_from(["desctl", "encrypt"]).is_err());
    }
}
