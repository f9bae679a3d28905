//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};

use crate::model::TripStatus;
use crate::scan::CameraFacing;

/// Bus administration commands.
#[derive(Debug, Subcommand)]
pub enum BusCommand {
    /// Register a new bus
    Add {
        /// Display name, e.g. "Bus 12"
        name: String,

        /// Supervisor riding this bus
        #[arg(short, long)]
        supervisor: Option<String>,
    },

    /// List all buses
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show a bus with its students and active trip
    Show {
        /// Bus id
        bus_id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Assign or clear the supervisor of a bus
    Assign {
        /// Bus id
        bus_id: String,

        /// Supervisor name; omit to clear
        supervisor: Option<String>,
    },

    /// Remove a bus with its students, trips and attendance
    Remove {
        /// Bus id
        bus_id: String,
    },
}

/// Student roster commands.
#[derive(Debug, Subcommand)]
pub enum StudentCommand {
    /// Register a student on a bus
    Add {
        /// Bus id
        bus_id: String,

        /// Student name
        name: String,

        /// National id number
        #[arg(short, long, default_value = "")]
        national_id: String,

        /// Residential area
        #[arg(short, long, default_value = "")]
        area: String,
    },

    /// List the students of a bus
    List {
        /// Bus id
        bus_id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove a student (past attendance is kept)
    Remove {
        /// Bus id
        bus_id: String,

        /// Student id
        student_id: String,
    },

    /// Print the QR badge payload of a student
    Qr {
        /// Bus id
        bus_id: String,

        /// Student id
        student_id: String,
    },
}

/// Trip lifecycle commands.
#[derive(Debug, Subcommand)]
pub enum TripCommand {
    /// Open a trip for today
    Start {
        /// Bus id
        bus_id: String,
    },

    /// Close a trip, reconcile counts and send the summary
    End {
        /// Bus id
        bus_id: String,

        /// Trip id; defaults to today's active trip
        #[arg(short, long)]
        trip: Option<String>,
    },

    /// Show the active trip of a bus
    Status {
        /// Bus id
        bus_id: String,

        /// Day to look at (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// List the trips of a bus
    List {
        /// Bus id
        bus_id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Mark a trip finished without counting or notifying
    Stop {
        /// Bus id
        bus_id: String,

        /// Trip id
        trip_id: String,
    },

    /// Delete a trip and its attendance
    Delete {
        /// Bus id
        bus_id: String,

        /// Trip id
        trip_id: String,
    },
}

/// Scan command arguments.
#[derive(Debug, Args)]
pub struct ScanCommand {
    /// Bus id
    pub bus_id: String,

    /// Trip id; defaults to today's active trip
    #[arg(short, long)]
    pub trip: Option<String>,

    /// Camera to scan with
    #[arg(short, long, value_enum)]
    pub facing: Option<CameraFacing>,

    /// Close the trip when scanning ends
    #[arg(long)]
    pub end_trip: bool,
}

/// Report commands.
#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// Present and absent students of one trip
    Trip {
        /// Bus id
        bus_id: String,

        /// Trip id
        trip_id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// One row per trip across all buses
    List(ReportListCommand),

    /// Fleet-wide totals and trips, newest first
    Dashboard {
        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },
}

/// Report list filters.
#[derive(Debug, Args)]
pub struct ReportListCommand {
    /// Only trips of the bus with this name
    #[arg(short, long)]
    pub bus: Option<String>,

    /// Only trips with this status
    #[arg(short, long, value_enum)]
    pub status: Option<TripStatusArg>,

    /// First day included (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last day included (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the password digest to put in an account entry
    HashPassword {
        /// The password to hash
        password: String,
    },
}

/// Trip status argument for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TripStatusArg {
    /// Trips still open
    Active,
    /// Closed trips
    Finished,
}

impl From<TripStatusArg> for TripStatus {
    fn from(arg: TripStatusArg) -> Self {
        match arg {
            TripStatusArg::Active => Self::Active,
            TripStatusArg::Finished => Self::Finished,
        }
    }
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}
