use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    about = "LNURL client and on-chain sweeper for a lightning wallet",
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION")
)]
pub struct CLIArgs {
    #[arg(
        short,
        long,
        help = "Use the <file name> as the location of the config file",
        required = false
    )]
    pub config: Option<String>,
    #[arg(
        short,
        long,
        help = "Use the <directory> as the location of the database",
        required = false
    )]
    pub db: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve an LNURL and print what the service asks for
    Resolve { lnurl: String },
    /// Log in to an LNURL-auth service
    Auth {
        lnurl: String,
        /// Ask the service for a JWT session token
        #[arg(long)]
        jwt: bool,
    },
    /// Ask an LNURL-withdraw service to pay an invoice
    Withdraw { lnurl: String, invoice: String },
    /// Fetch and verify an invoice from an LNURL-pay service
    Pay {
        lnurl: String,
        amount_sat: u64,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Decrypt the aes success action of a settled payment
    Decrypt {
        payment_hash: String,
        /// Hex encoded payment preimage
        preimage: String,
    },
    /// Build signed transactions sending all confirmed coins to an address
    Sweep { address: String },
    /// Broadcast a hex encoded transaction
    Publish { tx_hex: String },
}
