use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pin_ledger::{
    db, setup_database, CustomerToken, EnvironmentResolver, Gateway, HttpTransport, PinConfig,
    PinRecipient, PinTransaction, PinTransfer,
};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pin-ledger")]
#[command(about = "Local ledger for Pin Payments charges and transfers", long_about = None)]
struct Cli {
    /// Environment configuration (YAML)
    #[arg(long, global = true, default_value = "pin.yaml")]
    config: PathBuf,

    /// SQLite database file
    #[arg(long, global = true, default_value = "pin-ledger.db")]
    db: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tables and indexes
    InitDb,

    /// Resolve every configured environment and print its endpoint
    CheckConfig,

    /// Submit a charge. Exactly one of --card-token / --customer-id.
    Charge {
        /// Amount in dollars, e.g. 19.99
        #[arg(long)]
        amount: Decimal,

        #[arg(long)]
        email: String,

        /// Customer IP address
        #[arg(long)]
        ip: String,

        #[arg(long)]
        card_token: Option<String>,

        /// Row id of a stored customer
        #[arg(long)]
        customer_id: Option<i64>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long, default_value = "AUD")]
        currency: String,

        /// Environment name, default from config
        #[arg(long)]
        environment: Option<String>,
    },

    /// Re-run submission of a stored transaction (no-op once processed)
    Process {
        #[arg(long)]
        id: i64,
    },

    /// Create a Pin customer from a card token
    CreateCustomer {
        #[arg(long)]
        card_token: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        environment: Option<String>,
    },

    /// List stored transactions, newest first
    List,

    /// Write all transactions as CSV
    ExportTransactions {
        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Register a transfer recipient with a bank account
    CreateRecipient {
        #[arg(long)]
        email: String,

        /// Name on the bank account
        #[arg(long)]
        account_name: String,

        #[arg(long)]
        bsb: String,

        #[arg(long)]
        number: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        environment: Option<String>,
    },

    /// Send money to a stored recipient
    SendTransfer {
        /// Recipient token (rp_...)
        #[arg(long)]
        recipient: String,

        /// Amount in minor units (cents for AUD)
        #[arg(long)]
        amount: i64,

        #[arg(long)]
        description: String,

        #[arg(long)]
        currency: Option<String>,

        #[arg(long)]
        environment: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("open database {}", path.display()))?;
    setup_database(&conn).context("setup database")?;
    Ok(conn)
}

fn load_gateway(path: &Path) -> Result<Gateway<HttpTransport>> {
    let config = PinConfig::load(path).with_context(|| format!("load config {}", path.display()))?;
    let transport = HttpTransport::new().context("build HTTP client")?;
    Ok(Gateway::new(EnvironmentResolver::new(config), transport))
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::InitDb => {
            open_db(&cli.db)?;
            println!("initialized {}", cli.db.display());
        }

        Commands::CheckConfig => {
            let config = PinConfig::load(&cli.config)
                .with_context(|| format!("load config {}", cli.config.display()))?;
            let resolver = EnvironmentResolver::new(config);
            let mut failures = 0;

            for name in resolver.config().environment_names() {
                let marker = if name == resolver.default_name() { "*" } else { " " };
                match resolver.resolve(Some(name)) {
                    Ok(env) => println!("{} {:<10} {}", marker, name, env.base_url()),
                    Err(e) => {
                        failures += 1;
                        println!("{} {:<10} {}", marker, name, e);
                    }
                }
            }

            if failures > 0 {
                bail!("{} environment(s) failed to resolve", failures);
            }
        }

        Commands::Charge {
            amount,
            email,
            ip,
            card_token,
            customer_id,
            description,
            currency,
            environment,
        } => {
            let conn = open_db(&cli.db)?;
            let gateway = load_gateway(&cli.config)?;

            let mut tx = PinTransaction::new(amount, &email, &ip);
            tx.card_token = card_token;
            tx.customer_id = customer_id;
            tx.description = description;
            tx.currency = currency;
            tx.environment = environment.unwrap_or_default();

            let response = tx.process_transaction(&conn, &gateway).context("process transaction")?;
            println!(
                "transaction {}: {} ({})",
                tx,
                if tx.succeeded { "succeeded" } else { "failed" },
                response.unwrap_or_default()
            );
        }

        Commands::Process { id } => {
            let conn = open_db(&cli.db)?;
            let gateway = load_gateway(&cli.config)?;

            let mut tx = db::get_transaction(&conn, id)?.with_context(|| format!("no transaction {}", id))?;
            match tx.process_transaction(&conn, &gateway).context("process transaction")? {
                Some(response) => println!("transaction {}: {}", id, response),
                None => println!("transaction {} was already processed", id),
            }
        }

        Commands::CreateCustomer {
            card_token,
            email,
            environment,
        } => {
            let conn = open_db(&cli.db)?;
            let gateway = load_gateway(&cli.config)?;

            let customer =
                CustomerToken::create_from_card_token(&conn, &gateway, &card_token, &email, environment.as_deref())
                    .context("create customer")?;
            println!("customer {} (id {})", customer, customer.id.unwrap_or_default());
        }

        Commands::List => {
            let conn = open_db(&cli.db)?;
            for tx in db::get_all_transactions(&conn)? {
                println!(
                    "{:>6}  {}  {:<5} {:>10} {}  {:<9} {}",
                    tx.id.unwrap_or_default(),
                    tx.date.map(|d| d.format("%Y-%m-%d %H:%M").to_string()).unwrap_or_default(),
                    tx.environment,
                    tx.amount,
                    tx.currency,
                    match (tx.processed, tx.succeeded) {
                        (false, _) => "pending",
                        (true, true) => "succeeded",
                        (true, false) => "failed",
                    },
                    tx.pin_response.as_deref().unwrap_or_default()
                );
            }
        }

        Commands::ExportTransactions { output } => {
            let conn = open_db(&cli.db)?;
            let count = match output {
                Some(path) => {
                    let file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
                    db::export_transactions_csv(&conn, file)?
                }
                None => db::export_transactions_csv(&conn, io::stdout().lock())?,
            };
            eprintln!("exported {} transactions", count);
        }

        Commands::CreateRecipient {
            email,
            account_name,
            bsb,
            number,
            name,
            environment,
        } => {
            let conn = open_db(&cli.db)?;
            let gateway = load_gateway(&cli.config)?;

            let recipient = PinRecipient::create_with_bank_account(
                &conn,
                &gateway,
                &email,
                &account_name,
                &bsb,
                &number,
                name.as_deref(),
                environment.as_deref(),
            )
            .context("create recipient")?;
            println!("recipient {} in {}", recipient, recipient.environment);
        }

        Commands::SendTransfer {
            recipient,
            amount,
            description,
            currency,
            environment,
        } => {
            let conn = open_db(&cli.db)?;
            let gateway = load_gateway(&cli.config)?;

            let recipient = db::get_recipient_by_token(&conn, &recipient)?
                .with_context(|| format!("no stored recipient {}", recipient))?;
            let transfer = PinTransfer::send_new(
                &conn,
                &gateway,
                amount,
                &description,
                &recipient,
                currency.as_deref(),
                environment.as_deref(),
            )
            .context("send transfer")?;

            println!(
                "transfer {} of {} {}: {}",
                transfer.transfer_token.as_deref().unwrap_or_default(),
                transfer.value(),
                transfer.currency,
                transfer.status.as_deref().unwrap_or_default()
            );
        }
    }

    Ok(())
}
