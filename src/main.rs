//! Headless console for the ACM link.
//! Usage: `acm-link [config-dir]`, then type `help`.

use std::path::PathBuf;
use std::sync::Arc;

use acm_link_lib::config::{AppConfig, CHANNEL_NAMES_FILE_NAME, JsonNameStore};
use acm_link_lib::core::protocol::CutoffConfig;
use acm_link_lib::{commands, logging, state::AppState};
use anyhow::{Context, Result};
use log::{LevelFilter, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_CONFIG_DIR: &str = "acm-config";

const HELP: &str = "\
lc <1-8> on|off        switch a low-current output
mc <1-2> on|off        switch a medium-current output
b <1-8> <0-100>        set low-current brightness in percent
config <out> <in> on|off  send cut-out/cut-in voltages and auto cutoff
names                  list channel names
rename <1-10> <name>   rename a channel (9 and 10 are MC1, MC2)
status                 show link status and telemetry
fg | bg                simulate app foreground/background
quit";

#[tokio::main]
async fn main() -> Result<()> {
    let _log_messages = logging::init(LevelFilter::Info)?;

    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));
    let mut config = AppConfig::load_config(&config_dir).await?;
    let name_store = Arc::new(JsonNameStore::new(config_dir.join(CHANNEL_NAMES_FILE_NAME)));

    info!("Starting AppState initialization.");
    let state = AppState::new(&config, name_store)
        .await
        .context("Failed to initialize AppState with the Bluetooth transport")?;

    let mut status_rx = state.link.subscribe_status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            info!("Link status: {}", status);
        }
    });

    let mut device_rx = state.link.subscribe_device();
    tokio::spawn(async move {
        while device_rx.changed().await.is_ok() {
            let telemetry = device_rx.borrow_and_update().telemetry;
            info!(
                "Battery {:.2} V, load {:.2} A, solar {:.2} V {:.2} A{}",
                telemetry.battery_voltage,
                telemetry.load_current,
                telemetry.solar_voltage,
                telemetry.solar_current,
                if telemetry.solar_charging { " (charging)" } else { "" }
            );
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "quit" => break,
                Some(line) => match run_command(&state, line.trim()).await {
                    Ok(output) if !output.is_empty() => println!("{}", output),
                    Ok(_) => {}
                    Err(e) => warn!("{}", e),
                },
                None => break,
            },
        }
    }

    info!("Shutting down");
    state.shutdown().await;
    config.cutoff = commands::cutoff_config(&state).await;
    config.save_config(&config_dir).await?;
    Ok(())
}

fn parse_switch(word: Option<&str>) -> Result<bool, String> {
    match word {
        Some("on") | Some("1") => Ok(true),
        Some("off") | Some("0") => Ok(false),
        other => Err(format!("expected on/off, got {:?}", other)),
    }
}

/// Parses a 1-based channel number from the console into a 0-based index.
fn parse_index(word: Option<&str>) -> Result<usize, String> {
    let number: usize = word
        .ok_or("missing channel number")?
        .parse()
        .map_err(|e| format!("bad channel number: {}", e))?;
    number
        .checked_sub(1)
        .ok_or_else(|| "channel numbers start at 1".to_string())
}

fn parse_number(word: Option<&str>) -> Result<f32, String> {
    word.ok_or("missing number")?
        .parse()
        .map_err(|e| format!("bad number: {}", e))
}

async fn run_command(state: &AppState, line: &str) -> Result<String, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(String::new());
    };

    match verb {
        "lc" => {
            let index = parse_index(words.next())?;
            let on = parse_switch(words.next())?;
            commands::set_low_current(state, index, on).await?;
        }
        "mc" => {
            let index = parse_index(words.next())?;
            let on = parse_switch(words.next())?;
            commands::set_medium_current(state, index, on).await?;
        }
        "b" => {
            let index = parse_index(words.next())?;
            let percent = parse_number(words.next())?;
            commands::set_brightness(state, index, percent / 100.0).await?;
        }
        "config" => {
            let config = CutoffConfig {
                cut_out_voltage: parse_number(words.next())?,
                cut_in_voltage: parse_number(words.next())?,
                auto_cutoff: parse_switch(words.next())?,
                ..commands::cutoff_config(state).await
            };
            commands::send_configuration(state, config).await?;
        }
        "names" => {
            let names = commands::channel_names(state).await;
            return Ok(names
                .iter()
                .enumerate()
                .map(|(i, name)| format!("{:>2} {}", i + 1, name))
                .collect::<Vec<_>>()
                .join("\n"));
        }
        "rename" => {
            let index = parse_index(words.next())?;
            let name = words.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return Err("missing name".into());
            }
            commands::rename_channel(state, index, name).await?;
        }
        "status" => {
            let device = commands::device_state(state);
            let lc = device
                .channels
                .low_current
                .iter()
                .map(|c| if c.enabled { format!("{:.0}%", c.brightness * 100.0) } else { "off".into() })
                .collect::<Vec<_>>()
                .join(" ");
            let mc = device
                .channels
                .medium_current
                .iter()
                .map(|c| if c.enabled { "on" } else { "off" })
                .collect::<Vec<_>>()
                .join(" ");
            return Ok(format!(
                "{} | {:.2} V | LC {} | MC {}",
                commands::link_status(state),
                device.telemetry.battery_voltage,
                lc,
                mc
            ));
        }
        "fg" => commands::app_foreground(state),
        "bg" => commands::app_background(state),
        "help" => return Ok(HELP.to_string()),
        other => return Err(format!("unknown command {:?}, try help", other)),
    }
    Ok(String::new())
}
