use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use crate::accounts::{
    AccountManager, AccountRecord, IdentifierKind, Listing, display_value, fields_from_flags,
};
use crate::auth::SalesforceLogin;
use crate::config;
use crate::logging::{self, DEFAULT_LOG_FILE, LogConfig, LogGuard};

const EXAMPLES: &str = "\
Examples:
  sf-account create --name \"Acme Corp\" --type \"Customer\"
  sf-account update --id \"001XX000003DHP0\" --name \"New Name\"
  sf-account update --account-number \"ACC-001\" --phone \"555-1234\"
  sf-account list --limit 5
  sf-account list --filter \"Type='Customer'\" --output-file accounts.txt";

#[derive(Debug, Parser)]
#[command(
    name = "sf-account",
    version,
    about = "Create, update and list Salesforce Account records",
    after_help = EXAMPLES,
    arg_required_else_help = true
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Preview operations without making changes
    #[arg(long, global = true)]
    dry_run: bool,

    /// File that log output is appended to
    #[arg(long, global = true, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a new account
    Create(CreateArgs),
    /// Update an existing account
    Update(UpdateArgs),
    /// List accounts
    List(ListArgs),
}

/// Optional fields shared by `create` and `update`.
#[derive(Debug, Args)]
struct DetailArgs {
    /// Account type (e.g., Customer, Prospect)
    #[arg(long = "type")]
    account_type: Option<String>,
    /// Industry
    #[arg(long)]
    industry: Option<String>,
    /// Phone number
    #[arg(long)]
    phone: Option<String>,
    /// Website URL
    #[arg(long)]
    website: Option<String>,
    /// Billing street address
    #[arg(long)]
    billing_street: Option<String>,
    /// Billing city
    #[arg(long)]
    billing_city: Option<String>,
    /// Billing state
    #[arg(long)]
    billing_state: Option<String>,
    /// Billing postal code
    #[arg(long)]
    billing_postal_code: Option<String>,
    /// Billing country
    #[arg(long)]
    billing_country: Option<String>,
}

impl DetailArgs {
    fn flag_values(&self) -> [(&'static str, Option<&str>); 9] {
        [
            ("type", self.account_type.as_deref()),
            ("industry", self.industry.as_deref()),
            ("phone", self.phone.as_deref()),
            ("website", self.website.as_deref()),
            ("billing-street", self.billing_street.as_deref()),
            ("billing-city", self.billing_city.as_deref()),
            ("billing-state", self.billing_state.as_deref()),
            ("billing-postal-code", self.billing_postal_code.as_deref()),
            ("billing-country", self.billing_country.as_deref()),
        ]
    }
}

#[derive(Debug, Args)]
struct CreateArgs {
    /// Account name (required)
    #[arg(long)]
    name: String,
    #[command(flatten)]
    details: DetailArgs,
    /// Account number
    #[arg(long)]
    account_number: Option<String>,
}

impl CreateArgs {
    fn fields(&self) -> AccountRecord {
        let values = [("name", Some(self.name.as_str()))]
            .into_iter()
            .chain(self.details.flag_values())
            .chain([("account-number", self.account_number.as_deref())]);
        fields_from_flags(values, |_| true)
    }
}

#[derive(Debug, Args)]
#[command(group(clap::ArgGroup::new("target").required(true).args(["id", "account_number"])))]
struct UpdateArgs {
    /// Account ID
    #[arg(long)]
    id: Option<String>,
    /// Account Number of the account to update
    #[arg(long)]
    account_number: Option<String>,
    /// Account name
    #[arg(long)]
    name: Option<String>,
    #[command(flatten)]
    details: DetailArgs,
}

impl UpdateArgs {
    /// Fields to change; an update that changes nothing is rejected.
    fn fields(&self) -> Result<AccountRecord> {
        let values = [("name", self.name.as_deref())]
            .into_iter()
            .chain(self.details.flag_values());
        let fields = fields_from_flags(values, |spec| spec.updatable);
        anyhow::ensure!(!fields.is_empty(), "No fields to update specified");
        Ok(fields)
    }

    fn target(&self) -> Result<(&str, IdentifierKind)> {
        match (&self.id, &self.account_number) {
            (Some(id), _) => Ok((id.as_str(), IdentifierKind::Id)),
            (None, Some(number)) => Ok((number.as_str(), IdentifierKind::AccountNumber)),
            (None, None) => bail!("one of --id or --account-number is required"),
        }
    }
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Number of records to return (0 for all)
    #[arg(long, default_value_t = 10)]
    limit: usize,
    /// SOQL WHERE clause filter
    #[arg(long)]
    filter: Option<String>,
    /// Output results to text file (one record per line)
    #[arg(long)]
    output_file: Option<PathBuf>,
}

/// Global options that apply to every subcommand.
struct Options {
    config: Option<PathBuf>,
    dry_run: bool,
}

// -- output --

struct Column {
    header: &'static str,
    field: &'static str,
    width: usize,
    /// Values longer than this are cut.
    max: Option<usize>,
}

const fn column(
    header: &'static str,
    field: &'static str,
    width: usize,
    max: Option<usize>,
) -> Column {
    Column {
        header,
        field,
        width,
        max,
    }
}

const COLUMNS: [Column; 7] = [
    column("ID", "Id", 18, None),
    column("Name", "Name", 25, Some(24)),
    column("Type", "Type", 12, Some(11)),
    column("Industry", "Industry", 15, Some(14)),
    column("Phone", "Phone", 15, Some(14)),
    column("Website", "Website", 25, Some(24)),
    column("Domain", "Domain__c", 20, Some(19)),
];

const RULE_WIDTH: usize = 135;

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((i, _)) => &value[..i],
        None => value,
    }
}

fn table_header() -> String {
    COLUMNS
        .iter()
        .map(|c| format!("{:<width$}", c.header, width = c.width))
        .collect::<Vec<_>>()
        .join(" ")
}

fn table_row(account: &AccountRecord) -> String {
    COLUMNS
        .iter()
        .map(|c| {
            let value = account.get(c.field).map(display_value).unwrap_or_default();
            let shown = match c.max {
                Some(max) => truncate(&value, max),
                None => &value,
            };
            format!("{:<width$}", shown, width = c.width)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_accounts(accounts: &[AccountRecord]) {
    println!("{}", table_header());
    println!("{}", "-".repeat(RULE_WIDTH));
    for account in accounts {
        println!("{}", table_row(account));
    }
}

fn install_interrupt_handler(log: Arc<Mutex<Option<LogGuard>>>) {
    let handler = ctrlc::set_handler(move || {
        eprintln!("\nOperation cancelled by user");
        logging::release(&log);
        std::process::exit(1);
    });
    if let Err(e) = handler {
        warn!("failed to install interrupt handler: {e}");
    }
}

// -- command handlers --

fn manager(opts: &Options) -> Result<AccountManager<SalesforceLogin>> {
    let credentials = config::resolve(opts.config.as_deref())?;
    Ok(AccountManager::new(SalesforceLogin, credentials))
}

fn handle_create(args: CreateArgs, opts: &Options) -> Result<()> {
    let fields = args.fields();
    let id = manager(opts)?
        .create(&fields, opts.dry_run)
        .context("Failed to create account")?;
    if opts.dry_run {
        println!("Dry run completed successfully");
    } else {
        println!("Created account with ID: {id}");
    }
    Ok(())
}

fn handle_update(args: UpdateArgs, opts: &Options) -> Result<()> {
    let fields = args.fields()?;
    let (identifier, kind) = args.target()?;
    manager(opts)?
        .update(identifier, &fields, kind, opts.dry_run)
        .context("Failed to update account")?;
    if opts.dry_run {
        println!("Dry run completed successfully");
    } else {
        println!("Account updated successfully");
    }
    Ok(())
}

fn handle_list(args: ListArgs, opts: &Options) -> Result<()> {
    let output = args.output_file.as_deref();
    let listing = manager(opts)?
        .list(args.limit, args.filter.as_deref(), output)
        .context("Failed to retrieve accounts")?;
    report_listing(&listing, output)
}

/// Print the outcome of `list`. A requested file that was not written is an
/// error even when nothing matched.
fn report_listing(listing: &Listing, output: Option<&Path>) -> Result<()> {
    match (output, listing.bytes_written) {
        (Some(path), None) => bail!(
            "Retrieved {} accounts but failed to write {}",
            listing.records.len(),
            path.display()
        ),
        _ if listing.records.is_empty() => println!("No accounts found"),
        (None, _) => print_accounts(&listing.records),
        (Some(path), Some(bytes)) => println!(
            "Successfully wrote {} accounts to {} ({bytes} bytes)",
            listing.records.len(),
            path.display()
        ),
    }
    Ok(())
}

// -- main dispatch --

/// Parse CLI arguments, run the requested account command and map the outcome
/// to the process exit code.
pub fn run<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let log = Arc::new(Mutex::new(Some(logging::init(&LogConfig {
        verbose: cli.verbose,
        file: Some(cli.log_file),
    }))));
    install_interrupt_handler(Arc::clone(&log));

    let opts = Options {
        config: cli.config,
        dry_run: cli.dry_run,
    };
    let result = match cli.command {
        Commands::Create(args) => handle_create(args, &opts),
        Commands::Update(args) => handle_update(args, &opts),
        Commands::List(args) => handle_list(args, &opts),
    };

    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.verbose {
                eprintln!("Error: {e:?}");
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    };
    logging::release(&log);
    code
}
