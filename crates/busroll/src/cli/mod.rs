//! Command-line interface for busroll.
//!
//! This module provides the CLI structure for the `busroll` binary. Handlers
//! live in the binary and call straight into the library.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    BusCommand, ConfigCommand, OutputFormat, ReportCommand, ReportListCommand, ScanCommand,
    StudentCommand, TripCommand, TripStatusArg,
};

/// busroll - School-bus trip attendance
///
/// Opens trips, records boarding students from scanned QR badges, and
/// reconciles present and absent counts when a trip closes.
#[derive(Debug, Parser)]
#[command(name = "busroll")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in with a configured account
    Login {
        /// Account email
        email: String,

        /// Password; read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Forget the saved login
    Logout,

    /// Show the logged-in account
    Whoami,

    /// Manage buses
    #[command(subcommand)]
    Bus(BusCommand),

    /// Manage students
    #[command(subcommand)]
    Student(StudentCommand),

    /// Open, close and inspect trips
    #[command(subcommand)]
    Trip(TripCommand),

    /// Record boarding students from scanned payloads on stdin
    Scan(ScanCommand),

    /// Attendance reports
    #[command(subcommand)]
    Report(ReportCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.verbose, self.quiet)
    }
}
