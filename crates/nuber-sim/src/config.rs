use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use nuber::DEFAULT_IDLE_CAPACITY;
use std::collections::HashSet;

/// Runtime configuration for the `nuber-sim` binary.
///
/// Every value is read from a CLI flag or the matching environment variable,
/// with defaults that reproduce a small two-region city.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "nuber-sim",
    version,
    about = "Simulates drivers and passengers booked through the nuber dispatch"
)]
pub struct CliArgs {
    /// Region and the number of bookings it may run at once, as `NAME=CAP`.
    ///
    /// Repeat the flag for more regions, or pass a comma separated list
    /// through the environment.
    ///
    /// Environment variable: `NUBER_REGIONS`
    #[arg(
        long = "region",
        env = "NUBER_REGIONS",
        value_delimiter = ',',
        value_parser = parse_region,
        default_values = ["Primary=10", "Rural=1"]
    )]
    pub regions: Vec<(String, usize)>,

    /// Number of drivers added to the idle pool before booking starts.
    ///
    /// Environment variable: `NUBER_DRIVERS`
    #[arg(long, env = "NUBER_DRIVERS", default_value_t = 5)]
    pub drivers: usize,

    /// Number of passengers booked, spread round-robin over the regions.
    ///
    /// Environment variable: `NUBER_PASSENGERS`
    #[arg(long, env = "NUBER_PASSENGERS", default_value_t = 20)]
    pub passengers: usize,

    /// Upper bound of a driver's simulated pickup delay, in milliseconds.
    ///
    /// Environment variable: `NUBER_MAX_PICKUP_DELAY_MS`
    #[arg(long, env = "NUBER_MAX_PICKUP_DELAY_MS", default_value_t = 100)]
    pub max_pickup_delay_ms: u64,

    /// Upper bound of a passenger's simulated travel time, in milliseconds.
    ///
    /// Environment variable: `NUBER_MAX_TRAVEL_TIME_MS`
    #[arg(long, env = "NUBER_MAX_TRAVEL_TIME_MS", default_value_t = 100)]
    pub max_travel_time_ms: u64,

    /// Maximum number of idle drivers held by dispatch.
    ///
    /// Environment variable: `NUBER_IDLE_CAPACITY`
    #[arg(long, env = "NUBER_IDLE_CAPACITY", default_value_t = DEFAULT_IDLE_CAPACITY)]
    pub idle_capacity: usize,

    /// Log every booking lifecycle step.
    ///
    /// Environment variable: `NUBER_LOG_EVENTS`
    #[arg(long, env = "NUBER_LOG_EVENTS", default_value_t = false)]
    pub log_events: bool,

    /// How long to wait for admitted bookings after shutdown before aborting
    /// the rest.
    ///
    /// Environment variable: `NUBER_SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "NUBER_SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    pub shutdown_timeout_secs: u64,
}

fn parse_region(raw: &str) -> Result<(String, usize), String> {
    let (name, cap) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=CAP, got `{raw}`"))?;
    let cap = cap
        .trim()
        .parse()
        .map_err(|e| format!("invalid capacity in `{raw}`: {e}"))?;
    Ok((name.trim().to_owned(), cap))
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub regions: Vec<(String, usize)>,
    pub drivers: usize,
    pub passengers: usize,
    pub max_pickup_delay: Duration,
    pub max_travel_time: Duration,
    pub idle_capacity: usize,
    pub log_events: bool,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for SimConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.regions.is_empty() {
            bail!("at least one region is required");
        }

        let mut seen = HashSet::new();
        for (name, cap) in &args.regions {
            if name.is_empty() {
                bail!("region names must not be empty");
            }
            if *cap == 0 {
                bail!("region {name} must allow at least one booking at a time");
            }
            if !seen.insert(name.as_str()) {
                bail!("region {name} is listed more than once");
            }
        }

        if args.idle_capacity == 0 {
            bail!("NUBER_IDLE_CAPACITY must be greater than 0");
        }

        // Adding more drivers than the pool holds would block forever.
        if args.drivers > args.idle_capacity {
            bail!(
                "NUBER_DRIVERS ({}) exceeds the idle pool capacity ({})",
                args.drivers,
                args.idle_capacity
            );
        }

        if args.passengers > 0 && args.drivers == 0 {
            bail!("NUBER_DRIVERS must be greater than 0 when passengers are booked");
        }

        Ok(Self {
            regions: args.regions,
            drivers: args.drivers,
            passengers: args.passengers,
            max_pickup_delay: Duration::from_millis(args.max_pickup_delay_ms),
            max_travel_time: Duration::from_millis(args.max_travel_time_ms),
            idle_capacity: args.idle_capacity,
            log_events: args.log_events,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}
