mod client;
mod clone;
mod config;
mod inventory;
mod paginate;
mod render;
mod select;

use crate::client::ApiClient;
use crate::clone::{CloneReport, Outcome, SourceDevice};
use crate::config::{Overrides, Scope, resolve, save};
use crate::inventory::DeviceFamily;
use crate::paginate::Paginator;
use crate::render::{OutputFormat, RenderOpts, render_records, render_value};
use anyhow::{Context, Result, anyhow, bail};
use chrono::FixedOffset;
use clap::{ArgAction, CommandFactory, Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, Password, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use serde_json::{Value, json};

#[derive(Parser)]
#[command(
    name = "merakictl",
    version,
    about = "CLI for the Meraki Dashboard API"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "MERAKI_DASHBOARD_API_KEY",
        hide_env_values = true,
        help = "API key override for this invocation (otherwise read from config)"
    )]
    api_key: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "Base URL for the API (defaults to https://api.meraki.com/api/v1)"
    )]
    base_url: Option<String>,

    #[arg(
        long,
        short = 'o',
        value_enum,
        default_value_t = OutputFormat::Pretty,
        global = true,
        help = "Output format: pretty tables, compact JSON, or raw (the response body \
                for single resources, one JSON record per line for collections)"
    )]
    output: OutputFormat,

    #[arg(
        long,
        value_name = "COL1,COL2",
        global = true,
        help = "Override table columns (comma-separated)"
    )]
    columns: Option<String>,

    #[arg(
        long,
        value_name = "COLUMN",
        global = true,
        help = "Sort table rows by column (ascending)"
    )]
    sort_by: Option<String>,

    #[arg(
        long,
        value_name = "TEXT",
        global = true,
        help = "Filter rows containing TEXT (case-insensitive)"
    )]
    filter: Option<String>,

    #[arg(
        long,
        short = 'v',
        action = ArgAction::Count,
        global = true,
        help = "More log output (-v warn, -vv info, -vvv debug)"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist an API key and display settings to the chosen scope
    Configure {
        #[arg(long)]
        key: Option<String>,
        #[arg(
            long,
            value_enum,
            default_value_t = ScopeArg::User,
            help = "Where to write the config (local project dir or user config dir)"
        )]
        scope: ScopeArg,
        #[arg(
            long,
            value_name = "URL",
            help = "Optional base URL to store alongside the key"
        )]
        base_url: Option<String>,
        #[arg(
            long,
            value_name = "+HH:MM",
            allow_hyphen_values = true,
            help = "UTC offset used when displaying timestamps"
        )]
        utc_offset: Option<String>,
        #[arg(long, help = "Upper bound on pages followed per collection")]
        max_pages: Option<usize>,
    },
    /// List organizations visible to the API key
    Orgs,
    /// List networks of an organization
    Networks {
        #[arg(long, value_name = "ORG_ID")]
        org: Option<String>,
    },
    /// List devices of a network
    Devices {
        #[arg(long, value_name = "ORG_ID")]
        org: Option<String>,
        #[arg(long, value_name = "NETWORK_ID")]
        network: Option<String>,
        #[arg(long, value_enum, help = "Only switches (MS) or access points (MR)")]
        family: Option<FamilyArg>,
    },
    /// List all clients connected to a network
    Clients {
        #[arg(long, value_name = "ORG_ID")]
        org: Option<String>,
        #[arg(long, value_name = "NETWORK_ID")]
        network: Option<String>,
        #[arg(long, value_name = "SECONDS", help = "Look-back window for clients")]
        timespan: Option<u64>,
    },
    /// Count connected clients per wireless access point
    ApClients {
        #[arg(long, value_name = "ORG_ID")]
        org: Option<String>,
        #[arg(long, value_name = "NETWORK_ID")]
        network: Option<String>,
        #[arg(long, value_name = "SECONDS", help = "Look-back window for clients")]
        timespan: Option<u64>,
    },
    /// Show switch port configuration of an MS device
    SwitchPorts {
        #[arg(long, value_name = "ORG_ID")]
        org: Option<String>,
        #[arg(long, value_name = "NETWORK_ID")]
        network: Option<String>,
        #[arg(long, value_name = "SERIAL")]
        serial: Option<String>,
    },
    /// Clone one switch's port configs and switch settings onto other switches
    Clone {
        #[arg(long, value_name = "ORG_ID")]
        org: Option<String>,
        #[arg(long, value_name = "SERIAL", help = "Serial of the source switch")]
        source: Option<String>,
        #[arg(
            long = "target",
            value_name = "SERIAL",
            help = "Serial of a target switch (repeatable)"
        )]
        targets: Vec<String>,
        #[arg(long, help = "Show what would be cloned without making changes")]
        dry_run: bool,
        #[arg(long, short = 'y', help = "Do not ask for confirmation")]
        yes: bool,
    },
    /// Show current configuration (secrets masked)
    ConfigShow,
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Local,
    User,
}

impl From<ScopeArg> for Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Local => Scope::Local,
            ScopeArg::User => Scope::User,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FamilyArg {
    Switch,
    Wireless,
}

impl From<FamilyArg> for DeviceFamily {
    fn from(value: FamilyArg) -> Self {
        match value {
            FamilyArg::Switch => DeviceFamily::Switch,
            FamilyArg::Wireless => DeviceFamily::Wireless,
        }
    }
}

struct Session<'a> {
    pages: Paginator<'a>,
    output: OutputFormat,
    render_opts: RenderOpts,
    utc_offset: FixedOffset,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let cwd = std::env::current_dir().context("reading current directory")?;

    match &cli.command {
        Commands::Configure {
            key,
            scope,
            base_url,
            utc_offset,
            max_pages,
        } => {
            if key.is_none() && base_url.is_none() && utc_offset.is_none() && max_pages.is_none()
            {
                bail!("Provide at least one of --key, --base-url, --utc-offset or --max-pages");
            }
            if let Some(offset) = utc_offset {
                config::parse_offset(offset)?;
            }
            let mut existing = config::load_scope((*scope).into(), &cwd)?;
            if let Some(key) = key.clone() {
                existing.api_key = Some(key);
            }
            if let Some(url) = base_url.clone() {
                existing.base_url = Some(url);
            }
            if let Some(offset) = utc_offset.clone() {
                existing.utc_offset = Some(offset);
            }
            if let Some(max) = *max_pages {
                existing.max_pages = Some(max);
            }

            let path = save((*scope).into(), &existing, &cwd)?;
            println!("Saved configuration to {}", path.display());
            return Ok(());
        }
        Commands::ConfigShow => {
            let mut masked = config::load(&cwd)?;
            if masked.api_key.is_some() {
                masked.api_key = Some("*****".into());
            }
            println!("{}", serde_json::to_string_pretty(&masked)?);
            return Ok(());
        }
        Commands::Completion { shell } => {
            use clap_complete::{generate, shells};
            let mut cmd = Cli::command();
            let bin = cmd.get_name().to_string();
            match shell {
                CompletionShell::Bash => {
                    generate(shells::Bash, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Zsh => {
                    generate(shells::Zsh, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Fish => {
                    generate(shells::Fish, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::PowerShell => {
                    generate(shells::PowerShell, &mut cmd, bin, &mut std::io::stdout())
                }
            }
            return Ok(());
        }
        _ => {}
    }

    let effective = resolve(
        &cwd,
        Overrides {
            api_key: cli.api_key.clone(),
            base_url: cli.base_url.clone(),
        },
        prompt_api_key,
    )?;
    let client = ApiClient::new(&effective.base_url, &effective.api_key)?;
    let session = Session {
        pages: Paginator::new(&client).with_max_pages(effective.max_pages),
        output: cli.output,
        render_opts: RenderOpts {
            columns_override: cli.columns.as_ref().map(|c| {
                c.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            sort_by: cli.sort_by.clone(),
            filter: cli.filter.clone(),
        },
        utc_offset: effective.utc_offset,
    };

    match cli.command {
        Commands::Orgs => {
            let orgs = inventory::organizations(&session.pages).context("fetching organizations")?;
            session.records(&orgs, &["name", "id", "url"])
        }
        Commands::Networks { org } => {
            let Some(org) = choose_org(&session, org)? else {
                return Ok(());
            };
            let networks =
                inventory::networks(&session.pages, &org).context("fetching networks")?;
            session.records(&networks, &["name", "id", "productTypes", "timeZone", "tags"])
        }
        Commands::Devices {
            org,
            network,
            family,
        } => {
            let Some(network) = choose_network(&session, org, network)? else {
                return Ok(());
            };
            let mut devices = inventory::network_devices(&session.pages, &network)
                .context("fetching devices")?;
            if let Some(family) = family {
                devices = DeviceFamily::from(family).filter(devices);
            }
            session.records(
                &devices,
                &["name", "model", "serial", "mac", "lanIp", "firmware"],
            )
        }
        Commands::Clients {
            org,
            network,
            timespan,
        } => {
            let Some(network) = choose_network(&session, org, network)? else {
                return Ok(());
            };
            let mut clients = inventory::network_clients(&session.pages, &network, timespan)
                .context("fetching connected clients")?;
            if session.output == OutputFormat::Pretty {
                if clients.is_empty() {
                    println!("No connected clients found in the selected network.");
                    return Ok(());
                }
                render::localize_field(&mut clients, "lastSeen", &session.utc_offset);
                println!("Total connected clients: {}", clients.len());
            }
            session.records(
                &clients,
                &[
                    "description",
                    "mac",
                    "ip",
                    "userAgent",
                    "vlan",
                    "ssid",
                    "lastSeen",
                ],
            )
        }
        Commands::ApClients {
            org,
            network,
            timespan,
        } => {
            let Some(network) = choose_network(&session, org, network)? else {
                return Ok(());
            };
            let devices = inventory::network_devices(&session.pages, &network)
                .context("fetching wireless APs")?;
            let aps = DeviceFamily::Wireless.filter(devices);
            if aps.is_empty() && session.output == OutputFormat::Pretty {
                println!("No wireless APs found in the network.");
                return Ok(());
            }
            let rows: Vec<Value> = inventory::count_clients_per_ap(&session.pages, &aps, timespan)
                .into_iter()
                .map(|count| match count.clients {
                    Ok(n) => json!({"name": count.name, "serial": count.serial, "clients": n}),
                    Err(err) => json!({
                        "name": count.name,
                        "serial": count.serial,
                        "clients": null,
                        "error": err.to_string(),
                    }),
                })
                .collect();
            session.records(&rows, &["name", "serial", "clients", "error"])
        }
        Commands::SwitchPorts {
            org,
            network,
            serial,
        } => {
            let serial = match serial {
                Some(serial) => serial,
                None => {
                    let Some(network) = choose_network(&session, org, network)? else {
                        return Ok(());
                    };
                    let devices = inventory::network_devices(&session.pages, &network)
                        .context("fetching switches")?;
                    let switches = DeviceFamily::Switch.filter(devices);
                    if switches.is_empty() {
                        session.notice("No MS switches found in the selected network.");
                        return Ok(());
                    }
                    let Some(device) =
                        select::prompt_choice(&switches, "switch", "serial", "--serial")?
                    else {
                        println!("Exiting.");
                        return Ok(());
                    };
                    session.notice(&format!(
                        "Selected switch: {} | Model: {} | Firmware: {} | Serial: {}",
                        inventory::display_name(device, "serial"),
                        render::value_to_str(&device["model"]),
                        render::value_to_str(&device["firmware"]),
                        render::value_to_str(&device["serial"]),
                    ));
                    render::value_to_str(&device["serial"])
                }
            };
            let response = inventory::switch_ports(session.pages.client(), &serial)
                .with_context(|| format!("fetching switch ports of {serial}"))?;
            match (session.output, response.json) {
                (OutputFormat::Raw, _) | (_, None) => println!("{}", response.body),
                (OutputFormat::Pretty, Some(ports)) => {
                    println!("{}", serde_json::to_string_pretty(&ports)?)
                }
                (_, Some(ports)) => {
                    render_value(&ports, session.output, &session.render_opts, None)?
                }
            }
            Ok(())
        }
        Commands::Clone {
            org,
            source,
            targets,
            dry_run,
            yes,
        } => run_clone_command(&session, org, source, targets, dry_run, yes),
        Commands::Configure { .. } | Commands::ConfigShow | Commands::Completion { .. } => {
            unreachable!("handled before credentials are resolved")
        }
    }
}

impl Session<'_> {
    fn records(&self, records: &[Value], columns: &[&str]) -> Result<()> {
        render_records(records, self.output, &self.render_opts, Some(columns))
    }

    /// Human-facing status line. Kept off stdout for machine formats.
    fn notice(&self, message: &str) {
        match self.output {
            OutputFormat::Pretty => println!("{message}"),
            _ => eprintln!("{message}"),
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn prompt_api_key() -> Result<Option<String>> {
    if !select::is_interactive() {
        return Ok(None);
    }
    let key = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Meraki API key")
        .interact()
        .context("reading API key")?;
    Ok(Some(key))
}

fn choose_org(session: &Session, org: Option<String>) -> Result<Option<String>> {
    if org.is_some() {
        return Ok(org);
    }
    let orgs = inventory::organizations(&session.pages).context("fetching organizations")?;
    if orgs.is_empty() {
        session.notice("No organizations found. Check the API key's organization access.");
        return Ok(None);
    }
    choose_id(&orgs, "organization", "id", "--org")
}

fn choose_network(
    session: &Session,
    org: Option<String>,
    network: Option<String>,
) -> Result<Option<String>> {
    if network.is_some() {
        return Ok(network);
    }
    let Some(org) = choose_org(session, org)? else {
        return Ok(None);
    };
    let networks = inventory::networks(&session.pages, &org).context("fetching networks")?;
    if networks.is_empty() {
        session.notice("No networks found in the selected organization.");
        return Ok(None);
    }
    choose_id(&networks, "network", "id", "--network")
}

fn choose_id(
    items: &[Value],
    what: &'static str,
    id_field: &str,
    flag: &'static str,
) -> Result<Option<String>> {
    let chosen = select::prompt_choice(items, what, id_field, flag)?
        .and_then(|item| item.get(id_field).and_then(Value::as_str))
        .map(str::to_string);
    if chosen.is_none() {
        println!("Exiting.");
    }
    Ok(chosen)
}

fn run_clone_command(
    session: &Session,
    org: Option<String>,
    source: Option<String>,
    targets: Vec<String>,
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    let Some(org) = choose_org(session, org)? else {
        return Ok(());
    };

    // Menus need the switch list; with both flags given the source is
    // looked up once, by the clone run or by the dry-run preview.
    let (source, source_device, targets) = match source {
        Some(serial) if !targets.is_empty() => (serial, None, targets),
        source => {
            let devices = inventory::organization_devices(&session.pages, &org)
                .context("fetching switches")?;
            let switches = DeviceFamily::Switch.filter(devices);
            if switches.is_empty() {
                session.notice("No MS switches found in the organization.");
                return Ok(());
            }
            session.notice("Registered MS switches:");
            for line in select::menu_lines(&switches, "serial") {
                session.notice(&format!("  {line}"));
            }
            let record = match &source {
                Some(serial) => select::find_by(&switches, "serial", serial).ok_or_else(|| {
                    anyhow!("source switch {serial} not found in organization {org}")
                })?,
                None => {
                    let picked =
                        select::prompt_choice(&switches, "source switch", "serial", "--source")?;
                    let Some(record) = picked else {
                        println!("Exiting.");
                        return Ok(());
                    };
                    record
                }
            };
            let device = clone::source_from_record(record)
                .ok_or_else(|| anyhow!("selected switch has no serial"))?;
            let targets = if targets.is_empty() {
                session.notice("Select one or more target switches (0 when done):");
                select::prompt_many(&switches, "target switch", "serial", "--target")?
            } else {
                targets
            };
            (device.serial.clone(), Some(device), targets)
        }
    };

    let (targets, dropped) = select::normalize_targets(&source, &targets);
    if !dropped.is_empty() {
        session.notice(&format!(
            "Ignoring duplicate or source entries: {}",
            dropped.join(", ")
        ));
    }
    if targets.is_empty() {
        session.notice("No valid target switches selected.");
        return Ok(());
    }

    if dry_run {
        let device = match source_device {
            Some(device) => device,
            None => clone::resolve_source(&session.pages, &org, &source)?,
        };
        return print_clone_plan(&device, &targets, session.output);
    }

    if !yes {
        if !select::is_interactive() {
            bail!("refusing to clone without confirmation; pass --yes");
        }
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Clone {} onto {} switch(es)?",
                source,
                targets.len()
            ))
            .default(false)
            .interact()?;
        if !proceed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let bar = ProgressBar::new(targets.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("Cloning {bar:40} {pos}/{len} {msg}")?.progress_chars("=> "),
    );
    let on_progress = |p: &clone::Progress<'_>| {
        let state = if p.outcome.is_success() { "ok" } else { "failed" };
        bar.set_length(p.total as u64);
        bar.set_position(p.index as u64);
        bar.set_message(format!("{} {}", p.target, state));
    };
    let report = match source_device {
        Some(device) => {
            let outcomes =
                clone::apply_clone(session.pages.client(), &device, &targets, on_progress);
            CloneReport {
                source: device,
                outcomes,
            }
        }
        None => clone::run_clone(&session.pages, &org, &source, &targets, on_progress)?,
    };
    bar.finish_and_clear();

    print_clone_report(&report, session.output)?;
    if report.failed() > 0 {
        bail!(
            "{} of {} targets failed",
            report.failed(),
            report.outcomes.len()
        );
    }
    Ok(())
}

fn source_label(source: &SourceDevice) -> String {
    let SourceDevice {
        serial,
        name,
        model,
    } = source;
    format!(
        "{} ({}, {})",
        name.as_deref().unwrap_or("unnamed"),
        serial,
        model.as_deref().unwrap_or("unknown model")
    )
}

fn print_clone_plan(source: &SourceDevice, targets: &[String], output: OutputFormat) -> Result<()> {
    if output != OutputFormat::Pretty {
        let plan = json!({"dryRun": true, "source": source, "targets": targets});
        println!("{}", serde_json::to_string(&plan)?);
        return Ok(());
    }

    println!("Would clone {} onto:", source_label(source));
    for target in targets {
        println!("  {target}");
    }
    Ok(())
}

fn print_clone_report(report: &CloneReport, output: OutputFormat) -> Result<()> {
    if output != OutputFormat::Pretty {
        let rows: Vec<Value> = report
            .outcomes
            .iter()
            .map(|o| match &o.outcome {
                Outcome::Succeeded => json!({"serial": o.serial, "status": "ok"}),
                Outcome::Failed(err) => json!({
                    "serial": o.serial,
                    "status": "failed",
                    "httpStatus": err.status(),
                    "error": err.to_string(),
                }),
            })
            .collect();
        let summary = json!({
            "source": report.source,
            "outcomes": rows,
            "succeeded": report.succeeded(),
            "failed": report.failed(),
            "summary": report.summary(),
        });
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(());
    }

    println!("Source: {}", source_label(&report.source));
    for o in &report.outcomes {
        match &o.outcome {
            Outcome::Succeeded => println!("  {}: ok", o.serial),
            Outcome::Failed(err) => println!("  {}: FAILED ({})", o.serial, err),
        }
    }
    println!("{}", report.summary());
    Ok(())
}
