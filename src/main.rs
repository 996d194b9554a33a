use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::{error, info, warn};

use colorlight_z6::bridge::{BridgeLink, JoinMap, Signal};
use colorlight_z6::config;
use colorlight_z6::registry::Registry;
use colorlight_z6::Controller;

/// Drive Colorlight Z6 receiver cards from the command line.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Device configuration (YAML or JSON).
    #[arg(short, long, default_value = "./config.yaml")]
    config: PathBuf,
}

struct Device {
    controller: Arc<Controller>,
    link: Option<BridgeLink>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config_root = config::read_config(&args.config)?;
    let registry = Registry::with_defaults();

    let mut devices: HashMap<String, Device> = HashMap::new();
    for device_config in &config_root.devices {
        let controller = match registry.build(device_config) {
            Ok(controller) => Arc::new(controller),
            Err(err) => {
                error!("[{}] {}", device_config.key, err);
                continue;
            }
        };
        let link = device_config.bridge.as_ref().map(|bridge| {
            let joins = JoinMap::new(bridge.join_start).with_custom(&bridge.joins);
            BridgeLink::new(controller.clone(), joins)
        });
        watch_health(&device_config.key, &controller);
        controller.initialize();
        devices.insert(device_config.key.clone(), Device { controller, link });
    }

    if devices.is_empty() {
        return Err("no devices could be created".into());
    }
    info!("{} device(s) ready", devices.len());

    for line in io::stdin().lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if let Err(msg) = run_command(&devices, &words) {
            warn!("{}", msg);
        }
    }

    Ok(())
}

/// Log every health change of a device.
fn watch_health(key: &str, controller: &Controller) {
    let changes = controller.health_changes();
    let key = key.to_owned();
    thread::spawn(move || {
        for change in changes.iter() {
            info!("[{}] Health {:?} -> {:?}", key, change.previous, change.current);
        }
    });
}

fn run_command(devices: &HashMap<String, Device>, words: &[&str]) -> Result<(), String> {
    let device = |key: &str| {
        devices
            .get(key)
            .ok_or_else(|| format!("Unknown device {}", key))
    };
    let number = |text: &str| {
        text.parse::<u16>()
            .map_err(|_| format!("Not a number: {}", text))
    };

    match words {
        ["brightness", key, level] => device(*key)?.controller.set_brightness(number(*level)?),
        ["preset", key, preset] => device(*key)?.controller.recall_preset(number(*preset)?),
        ["on", key] => device(*key)?.controller.set_show_on(),
        ["off", key] => device(*key)?.controller.set_show_off(),
        ["join", kind, key, join, value] => {
            let link = device(*key)?
                .link
                .as_ref()
                .ok_or_else(|| format!("Device {} has no bridge", key))?;
            let join = join
                .parse::<u32>()
                .map_err(|_| format!("Not a join number: {}", join))?;
            let signal = match *kind {
                "d" => Signal::Digital {
                    join,
                    value: *value != "0",
                },
                "a" => Signal::Analog {
                    join,
                    value: number(*value)?,
                },
                _ => return Err(format!("Unknown join type {}", kind)),
            };
            for feedback in link.handle(signal) {
                println!("{:?}", feedback);
            }
        }
        ["status"] => {
            for (key, device) in devices {
                println!(
                    "{} ({}): id {} {:?} {:?} heartbeat {}",
                    key,
                    device.controller.name(),
                    device.controller.id(),
                    device.controller.protocol(),
                    device.controller.health_state(),
                    if device.controller.heartbeat_running() { "on" } else { "off" }
                );
            }
        }
        _ => return Err(format!("Unknown command: {}", words.join(" "))),
    }
    Ok(())
}
