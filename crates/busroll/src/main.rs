//! `busroll` - CLI for school-bus trip attendance
//!
//! This binary is a thin shell over the library: each command loads the
//! configuration, opens the store and calls one library operation.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::debug;

use busroll::cli::{
    BusCommand, Cli, Command, ConfigCommand, OutputFormat, ReportCommand, ReportListCommand,
    ScanCommand, StudentCommand, TripCommand,
};
use busroll::config::ScanConfig;
use busroll::fleet::BusOverview;
use busroll::report::{self, DashboardSummary, ReportFilter, TripReport};
use busroll::scan::LineSource;
use busroll::session::{self, SessionFile};
use busroll::store::records::NewStudent;
use busroll::{
    init_logging, notify, Bus, Config, Error, Fleet, Records, Reports, ScanFeedback, ScanSession,
    SqliteStore, Student, Trip, TripManager, TripSummary,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match run(cli).await {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<Error>() {
            Some(err) if err.is_user_facing() => {
                eprintln!("{err}");
                std::process::exit(1);
            }
            _ => Err(e),
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load_from(cli.config)?;
    let sessions = SessionFile::new(config.session_path());

    // Execute the command
    match cli.command {
        Command::Login { email, password } => handle_login(&config, &sessions, &email, password),
        Command::Logout => {
            if sessions.clear()? {
                println!("Logged out.");
            } else {
                println!("Not logged in.");
            }
            Ok(())
        }
        Command::Whoami => handle_whoami(&sessions),
        Command::Bus(cmd) => App::open(&config, sessions)?.bus(cmd).await,
        Command::Student(cmd) => App::open(&config, sessions)?.student(cmd).await,
        Command::Trip(cmd) => App::open(&config, sessions)?.trip(cmd).await,
        Command::Scan(cmd) => App::open(&config, sessions)?.scan(cmd).await,
        Command::Report(cmd) => App::open(&config, sessions)?.report(cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn handle_login(
    config: &Config,
    sessions: &SessionFile,
    email: &str,
    password: Option<String>,
) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    let session = session::login(&config.auth.accounts, email, &password)?;
    sessions.save(&session)?;
    println!("Logged in as {} ({}).", session.email, session.role);
    Ok(())
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn handle_whoami(sessions: &SessionFile) -> anyhow::Result<()> {
    match sessions.load()? {
        Some(session) => println!(
            "{} ({}), logged in {}",
            session.email,
            session.role,
            session.logged_in_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("Not logged in."),
    }
    Ok(())
}

/// Services wired to the configured store.
#[derive(Debug)]
struct App {
    sessions: SessionFile,
    records: Records,
    fleet: Fleet,
    trips: TripManager,
    reports: Reports,
    scan_config: ScanConfig,
}

impl App {
    fn open(config: &Config, sessions: SessionFile) -> anyhow::Result<Self> {
        let database_path = config.database_path();
        let store = SqliteStore::open(&database_path)
            .with_context(|| format!("opening database at {}", database_path.display()))?;
        debug!(path = %database_path.display(), "Database opened");

        let records = Records::new(Arc::new(store));
        let notifier = notify::from_config(&config.notify, config.notify_timeout())?;
        let timezone = config.timezone();

        Ok(Self {
            sessions,
            fleet: Fleet::new(records.clone(), &config.students)?,
            trips: TripManager::new(records.clone(), notifier, timezone),
            reports: Reports::new(records.clone(), timezone),
            records,
            scan_config: config.scan.clone(),
        })
    }

    async fn bus(&self, cmd: BusCommand) -> anyhow::Result<()> {
        let session = self.sessions.require()?;
        match cmd {
            BusCommand::Add { name, supervisor } => {
                let bus = self
                    .fleet
                    .add_bus(&session, &name, supervisor.as_deref())
                    .await?;
                println!("Added bus {} ({}).", bus.name, bus.id);
            }
            BusCommand::List { format } => print_buses(&self.fleet.buses().await?, format)?,
            BusCommand::Show { bus_id, format } => {
                print_overview(&self.fleet.overview(&bus_id).await?, format)?;
            }
            BusCommand::Assign { bus_id, supervisor } => {
                self.fleet
                    .assign_supervisor(&session, &bus_id, supervisor.as_deref())
                    .await?;
                match supervisor {
                    Some(name) => println!("Assigned {name} to bus {bus_id}."),
                    None => println!("Cleared the supervisor of bus {bus_id}."),
                }
            }
            BusCommand::Remove { bus_id } => {
                self.fleet.remove_bus(&session, &bus_id).await?;
                println!("Removed bus {bus_id}.");
            }
        }
        Ok(())
    }

    async fn student(&self, cmd: StudentCommand) -> anyhow::Result<()> {
        let session = self.sessions.require()?;
        match cmd {
            StudentCommand::Add {
                bus_id,
                name,
                national_id,
                area,
            } => {
                let student = self
                    .fleet
                    .add_student(
                        &session,
                        &bus_id,
                        NewStudent {
                            name,
                            national_id,
                            area,
                        },
                    )
                    .await?;
                println!("Added {} ({}).", student.name, student.id);
            }
            StudentCommand::List { bus_id, format } => {
                print_students(&self.fleet.students(&bus_id).await?, format)?;
            }
            StudentCommand::Remove { bus_id, student_id } => {
                self.fleet
                    .remove_student(&session, &bus_id, &student_id)
                    .await?;
                println!("Removed student {student_id}.");
            }
            StudentCommand::Qr { bus_id, student_id } => {
                println!("{}", self.fleet.badge_payload(&bus_id, &student_id).await?);
            }
        }
        Ok(())
    }

    async fn trip(&self, cmd: TripCommand) -> anyhow::Result<()> {
        let session = self.sessions.require()?;
        match cmd {
            TripCommand::Start { bus_id } => {
                let trip = self.trips.start_trip(&bus_id).await?;
                println!("Started trip {} for {}.", trip.id, trip.date);
            }
            TripCommand::End { bus_id, trip } => {
                let trip_id = self.resolve_trip(&bus_id, trip).await?;
                let summary = self.trips.end_trip(&bus_id, &trip_id, None).await?;
                print_summary(&summary);
            }
            TripCommand::Status { bus_id, date } => {
                let date = date.unwrap_or_else(|| self.trips.today());
                match self.trips.active_trip(&bus_id, date).await? {
                    Some(trip) => {
                        let scanned = self.records.attendance(&bus_id, &trip.id).await?.len();
                        println!(
                            "Trip {} active since {}, {scanned} scanned.",
                            trip.id,
                            trip.started_at.format("%H:%M UTC")
                        );
                    }
                    None => println!("No active trip for bus {bus_id} on {date}."),
                }
            }
            TripCommand::List { bus_id, format } => {
                print_trips(&self.trips.list_trips(&bus_id).await?, format)?;
            }
            TripCommand::Stop { bus_id, trip_id } => {
                self.trips.force_finish(&session, &bus_id, &trip_id).await?;
                println!("Stopped trip {trip_id}.");
            }
            TripCommand::Delete { bus_id, trip_id } => {
                self.trips.delete_trip(&session, &bus_id, &trip_id).await?;
                println!("Deleted trip {trip_id}.");
            }
        }
        Ok(())
    }

    async fn scan(&self, cmd: ScanCommand) -> anyhow::Result<()> {
        self.sessions.require()?;
        let trip_id = self.resolve_trip(&cmd.bus_id, cmd.trip).await?;

        let mut scan_config = self.scan_config.clone();
        if let Some(facing) = cmd.facing {
            scan_config.default_facing = facing;
        }
        let (feedback_tx, mut feedback_rx) = mpsc::channel(scan_config.channel_capacity.max(1));
        let mut session = ScanSession::new(
            Box::new(LineSource::stdin()),
            self.records.clone(),
            &scan_config,
            feedback_tx,
        );
        session.start(&cmd.bus_id, &trip_id).await?;
        eprintln!(
            "Scanning trip {trip_id} ({} camera). Ctrl-C or end of input stops.",
            session.facing()
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    debug!("Interrupted");
                    break;
                }
                Some(feedback) = feedback_rx.recv() => print_feedback(&feedback),
                () = session.closed() => break,
            }
        }

        let stats = session.stop().await?;
        while let Ok(feedback) = feedback_rx.try_recv() {
            print_feedback(&feedback);
        }
        if let Some(stats) = stats {
            eprintln!(
                "{} decoded, {} processed, {} duplicates ignored.",
                stats.decoded,
                stats.processed,
                stats.suppressed + stats.locked_out
            );
        }

        if cmd.end_trip {
            let summary = self
                .trips
                .end_trip(&cmd.bus_id, &trip_id, Some(&mut session))
                .await?;
            print_summary(&summary);
        }
        Ok(())
    }

    async fn report(&self, cmd: ReportCommand) -> anyhow::Result<()> {
        let session = self.sessions.require()?;
        match cmd {
            ReportCommand::Trip {
                bus_id,
                trip_id,
                format,
            } => {
                let report = self
                    .reports
                    .trip_report(&session, &bus_id, &trip_id)
                    .await?;
                print_trip_report(&report, format)?;
            }
            ReportCommand::List(ReportListCommand {
                bus,
                status,
                from,
                to,
                format,
            }) => {
                let filter = ReportFilter {
                    bus_name: bus,
                    status: status.map(Into::into),
                    from,
                    to,
                };
                let rows = self.reports.trip_reports(&session, &filter).await?;
                match format {
                    OutputFormat::Json => println!("{}", report::rows_to_json(&rows)?),
                    _ if rows.is_empty() => println!("No trips match."),
                    OutputFormat::Table => print!("{}", report::rows_to_table(&rows)),
                    OutputFormat::Plain => print!("{}", report::rows_to_plain(&rows)),
                }
            }
            ReportCommand::Dashboard { format } => {
                let summary = self.reports.dashboard_summary(&session).await?;
                print_dashboard(&summary, format)?;
            }
        }
        Ok(())
    }

    /// The given trip, or today's active trip of the bus.
    async fn resolve_trip(&self, bus_id: &str, trip_id: Option<String>) -> anyhow::Result<String> {
        if let Some(trip_id) = trip_id {
            return Ok(trip_id);
        }
        let today = self.trips.today();
        let trip = self
            .trips
            .active_trip(bus_id, today)
            .await?
            .ok_or_else(|| Error::no_active_trip(bus_id))?;
        Ok(trip.id)
    }
}

fn print_feedback(feedback: &ScanFeedback) {
    let mark = if feedback.is_success() { "+" } else { "!" };
    println!("{mark} {feedback}");
}

fn print_summary(summary: &TripSummary) {
    println!("Trip {} closed ({}, {})", summary.trip_id, summary.bus_name, summary.date);
    println!("  Students: {}", summary.total_students);
    println!("  Present:  {}", summary.present_count);
    println!("  Absent:   {}", summary.absent_count);
}

fn column_width<'a>(header: &str, values: impl Iterator<Item = &'a str>) -> usize {
    values
        .map(|v| v.chars().count())
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(header.len())
}

fn print_buses(buses: &[Bus], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(buses)?),
        OutputFormat::Table => {
            let id = column_width("ID", buses.iter().map(|b| b.id.as_str()));
            let name = column_width("NAME", buses.iter().map(|b| b.name.as_str()));
            println!("{:<id$}  {:<name$}  SUPERVISOR", "ID", "NAME");
            for bus in buses {
                println!(
                    "{:<id$}  {:<name$}  {}",
                    bus.id,
                    bus.name,
                    bus.supervisor_name.as_deref().unwrap_or("-")
                );
            }
        }
        OutputFormat::Plain => {
            for bus in buses {
                match &bus.supervisor_name {
                    Some(supervisor) => println!("{} {} ({supervisor})", bus.id, bus.name),
                    None => println!("{} {}", bus.id, bus.name),
                }
            }
        }
    }
    Ok(())
}

fn print_students(students: &[Student], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(students)?),
        OutputFormat::Table => {
            let id = column_width("ID", students.iter().map(|s| s.id.as_str()));
            let name = column_width("NAME", students.iter().map(|s| s.name.as_str()));
            let national = column_width(
                "NATIONAL ID",
                students.iter().map(|s| s.national_id.as_str()),
            );
            println!("{:<id$}  {:<name$}  {:<national$}  AREA", "ID", "NAME", "NATIONAL ID");
            for s in students {
                println!(
                    "{:<id$}  {:<name$}  {:<national$}  {}",
                    s.id, s.name, s.national_id, s.area
                );
            }
        }
        OutputFormat::Plain => {
            for s in students {
                println!("{} {}", s.id, s.name);
            }
        }
    }
    Ok(())
}

fn print_trips(trips: &[Trip], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(trips)?),
        OutputFormat::Table => {
            let id = column_width("ID", trips.iter().map(|t| t.id.as_str()));
            println!(
                "{:<id$}  {:<10}  {:<8}  {:>7}  {:>6}  {:>5}",
                "ID", "DATE", "STATUS", "PRESENT", "ABSENT", "TOTAL"
            );
            for t in trips {
                println!(
                    "{:<id$}  {:<10}  {:<8}  {:>7}  {:>6}  {:>5}",
                    t.id,
                    t.date.to_string(),
                    t.status.as_str(),
                    t.present_count,
                    t.absent_count,
                    t.total_students
                );
            }
        }
        OutputFormat::Plain => {
            for t in trips {
                println!("{} {} [{}]", t.id, t.date, t.status);
            }
        }
    }
    Ok(())
}

fn print_overview(overview: &BusOverview, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(overview)?);
        return Ok(());
    }
    let bus = &overview.bus;
    println!("{} ({})", bus.name, bus.id);
    println!(
        "  Supervisor: {}",
        bus.supervisor_name.as_deref().unwrap_or("-")
    );
    println!("  Students:   {}", overview.students.len());
    println!("  Trips:      {}", overview.trip_count);
    match &overview.active_trip {
        Some(trip) => println!("  Active:     {} ({})", trip.id, trip.date),
        None => println!("  Active:     -"),
    }
    if !overview.students.is_empty() {
        println!();
        print_students(&overview.students, format)?;
    }
    Ok(())
}

fn print_trip_report(report: &TripReport, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "{} trip {} on {} [{}]",
        report.bus.name, report.trip.id, report.trip.date, report.trip.status
    );
    println!("Present ({}):", report.present.len());
    for s in &report.present {
        println!("  {}  {}", s.name, s.area);
    }
    println!("Absent ({}):", report.absent.len());
    for s in &report.absent {
        println!("  {}  {}", s.name, s.area);
    }
    Ok(())
}

fn print_dashboard(summary: &DashboardSummary, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!("Trips:         {}", summary.total_trips);
    println!("Active trips:  {}", summary.active_trips);
    println!("Total present: {}", summary.total_present);
    if summary.trips.is_empty() {
        return Ok(());
    }
    println!();
    let bus = column_width("BUS", summary.trips.iter().map(|t| t.bus_name.as_str()));
    println!(
        "{:<10}  {:<bus$}  {:<8}  {:>7}  {:>6}",
        "DATE", "BUS", "STATUS", "PRESENT", "ABSENT"
    );
    for t in &summary.trips {
        println!(
            "{:<10}  {:<bus$}  {:<8}  {:>7}  {:>6}",
            t.trip.date.to_string(),
            t.bus_name,
            t.trip.status.as_str(),
            t.trip.present_count,
            t.trip.absent_count
        );
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let mut shown = config.clone();
            if shown.notify.api_key.is_some() {
                shown.notify.api_key = Some("********".to_string());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", shown.database_path().display());
                println!("  Session path:       {}", shown.session_path().display());
                println!();
                println!("[Organization]");
                println!("  Name:               {}", shown.organization.name);
                println!("  Timezone:           {}", shown.organization.timezone);
                println!();
                println!("[Scan]");
                println!("  Release delay (ms): {}", shown.scan.release_delay_ms);
                println!("  Default camera:     {}", shown.scan.default_facing);
                println!();
                println!("[Notify]");
                println!(
                    "  Endpoint:           {}",
                    shown.notify.endpoint.as_deref().unwrap_or("(log only)")
                );
                println!("  To:                 {}", shown.notify.to);
                println!();
                println!("[Auth]");
                println!("  Accounts:           {}", shown.auth.accounts.len());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
        ConfigCommand::HashPassword { password } => {
            println!("{}", session::hash_password(&password));
        }
    }
    Ok(())
}
