// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `sensor-bridge`: publish Tinkerforge sensor readings to MQTT.

mod logging;

use std::process::ExitCode;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};

use sensor_bridge::bridge::{DEFAULT_BROKER_PORT, DEFAULT_KEEP_ALIVE};
use sensor_bridge::bus::{DEFAULT_BUS_HOST, DEFAULT_BUS_PORT};
use sensor_bridge::config::Settings;

/// Forward hot-pluggable Tinkerforge sensors to an MQTT broker.
///
/// Readings are published retained under `<topic>/<measurement>`.
#[derive(Debug, Parser)]
#[command(name = "sensor-bridge", version, disable_help_flag = true)]
struct Cli {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Only log to the system journal
    #[arg(short, long)]
    quiet: bool,

    /// MQTT client id
    #[arg(short = 'i', long = "id", value_name = "ID")]
    client_id: Option<String>,

    /// MQTT broker host
    #[arg(short = 'h', long, value_name = "HOST")]
    host: Option<String>,

    /// MQTT broker port
    #[arg(short, long, default_value_t = DEFAULT_BROKER_PORT)]
    port: u16,

    /// Topic prefix for published readings
    #[arg(short, long, value_name = "PREFIX")]
    topic: Option<String>,

    /// MQTT user name
    #[arg(short, long, value_name = "USER")]
    user: Option<String>,

    /// MQTT password
    #[arg(short = 'P', long, value_name = "PASSWORD")]
    password: Option<String>,

    /// MQTT keep-alive interval in seconds
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_KEEP_ALIVE.as_secs())]
    keepalive: u64,

    /// Brick daemon host
    #[arg(long, value_name = "HOST", default_value = DEFAULT_BUS_HOST)]
    bus_host: String,

    /// Brick daemon port
    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_BUS_PORT)]
    bus_port: u16,
}

impl Cli {
    fn settings(self) -> Result<Settings, sensor_bridge::ConfigError> {
        let mut builder = Settings::builder()
            .broker_port(self.port)
            .keep_alive(Duration::from_secs(self.keepalive))
            .bus_host(self.bus_host)
            .bus_port(self.bus_port);

        if let Some(id) = self.client_id {
            builder = builder.client_id(id);
        }
        if let Some(host) = self.host {
            builder = builder.broker_host(host);
        }
        if let Some(topic) = self.topic {
            builder = builder.topic(topic);
        }
        if let Some(user) = self.user {
            builder = builder.credentials(user, self.password.unwrap_or_default());
        }

        builder.build()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let quiet = cli.quiet;
    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e}\n");
            eprintln!("{}", Cli::command().render_usage());
            return ExitCode::FAILURE;
        }
    };

    logging::init(quiet);

    match sensor_bridge::runtime::run(&settings, shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Sensor bridge failed");
            ExitCode::FAILURE
        }
    }
}

/// Completes on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
