use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::Parser;
use ln_outbound::config::Settings;
use ln_outbound::database::Db;
use ln_outbound::ln::lnd::LndRest;
use ln_outbound::lnurl::{BackupRequester, LnUrlClient, LnUrlResponse};
use ln_outbound::sweep::SweepPlanner;
use ln_outbound::utils::{expand_path, sat_to_msat};
use ln_outbound::CARGO_PKG_VERSION;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cli::{CLIArgs, Command};

mod cli;

/// Reports seed creation in the log
struct LogBackupRequester {
    db_path: PathBuf,
}

impl BackupRequester for LogBackupRequester {
    fn request_backup(&self) {
        warn!(
            "New LNURL-auth seed created, back up {}",
            self.db_path.display()
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn lnurl_client(settings: &Settings, db_path: PathBuf) -> anyhow::Result<LnUrlClient> {
    let db = Arc::new(Db::new(db_path.clone()).await?);

    Ok(LnUrlClient::new(
        settings.info.network,
        Duration::from_secs(settings.lnurl.request_timeout_secs),
        settings.lnurl.max_derivation_attempts,
        db.clone(),
        db,
        Arc::new(LogBackupRequester { db_path }),
    )?)
}

fn sweep_planner(settings: &Settings) -> anyhow::Result<SweepPlanner> {
    let macaroon_path = expand_path(&settings.lnd.macaroon_path.to_string_lossy())
        .ok_or(anyhow!("macaroon path not defined"))?;
    let tls_cert_path = match &settings.lnd.tls_cert_path {
        Some(path) => Some(
            expand_path(&path.to_string_lossy()).ok_or(anyhow!("tls cert path not defined"))?,
        ),
        None => None,
    };

    let lnd = Arc::new(LndRest::new(
        &settings.lnd.rest_url,
        &macaroon_path,
        tls_cert_path.as_deref(),
        Duration::from_secs(settings.lnurl.request_timeout_secs),
    )?);

    Ok(
        SweepPlanner::new(lnd.clone(), lnd.clone(), lnd, settings.info.network)
            .with_conf_targets(settings.sweep.conf_targets.clone())
            .with_dust_limit(settings.sweep.dust_limit_sat),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CLIArgs::parse();

    // get config file name from args
    let config_file_arg = match args.config {
        Some(c) => c,
        None => "./config.toml".to_string(),
    };

    let settings = Settings::new(&Some(config_file_arg));

    tracing_subscriber::fmt()
        .with_max_level(settings.info.log_level())
        .init();

    debug!("ln-outbound {}", CARGO_PKG_VERSION.unwrap_or_default());

    let db_path = match args.db {
        Some(path) => PathBuf::from_str(&path)?,
        None => expand_path(&settings.info.db_path.to_string_lossy())
            .ok_or(anyhow!("db path not defined"))?,
    };

    match args.command {
        Command::Resolve { lnurl } => {
            let mut client = lnurl_client(&settings, db_path).await?;
            print_json(&client.resolve(&lnurl).await?)?;
        }
        Command::Auth { lnurl, jwt } => {
            let mut client = lnurl_client(&settings, db_path).await?;
            let params = match client.resolve(&lnurl).await? {
                LnUrlResponse::Auth(params) => params,
                other => bail!("Not an LNURL-auth request: {:?}", other),
            };
            let token = client.finish_auth(&params, jwt).await?;
            println!("Logged in to {}", params.host);
            if !token.is_empty() {
                println!("{}", token);
            }
        }
        Command::Withdraw { lnurl, invoice } => {
            let mut client = lnurl_client(&settings, db_path).await?;
            match client.resolve(&lnurl).await? {
                LnUrlResponse::Withdraw(params) => debug!("{:?}", params),
                other => bail!("Not an LNURL-withdraw request: {:?}", other),
            }
            client.finish_withdraw(&invoice).await?;
            println!("Withdraw request accepted");
        }
        Command::Pay {
            lnurl,
            amount_sat,
            comment,
        } => {
            let mut client = lnurl_client(&settings, db_path).await?;
            let params = match client.resolve(&lnurl).await? {
                LnUrlResponse::Pay(params) => params,
                other => bail!("Not an LNURL-pay request: {:?}", other),
            };

            if amount_sat < params.min_amount_sat || amount_sat > params.max_amount_sat {
                bail!(
                    "Amount must be between {} and {} sat",
                    params.min_amount_sat,
                    params.max_amount_sat
                );
            }
            if let Some(comment) = &comment {
                if comment.chars().count() > params.comment_allowed as usize {
                    bail!(
                        "Comment is limited to {} characters",
                        params.comment_allowed
                    );
                }
            }

            let amount_msat =
                sat_to_msat(amount_sat).ok_or(anyhow!("Amount {} sat is too large", amount_sat))?;
            let info = client
                .finish_pay(&params, amount_msat, comment.as_deref())
                .await?;
            print_json(&info)?;
        }
        Command::Decrypt {
            payment_hash,
            preimage,
        } => {
            let client = lnurl_client(&settings, db_path).await?;
            let preimage = hex::decode(preimage)?;
            println!(
                "{}",
                client
                    .decrypt_success_action(&payment_hash, &preimage)
                    .await?
            );
        }
        Command::Sweep { address } => {
            let planner = sweep_planner(&settings)?;
            print_json(&planner.plan(&address).await?)?;
        }
        Command::Publish { tx_hex } => {
            let planner = sweep_planner(&settings)?;
            planner.publish_transaction(&hex::decode(tx_hex)?).await?;
            println!("Transaction published");
        }
    }

    Ok(())
}
