use anyhow::{Context, Result};
use clap::{App, Arg};
use config::{Config, Environment, File};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::{
    alertmanager_webhook_receiver::AlertReceiverSettings, log::LogSettings, stomp::BrokerSettings,
};

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub receiver: AlertReceiverSettings,
    pub broker: BrokerSettings,
    pub log: LogSettings,
}

impl Settings {
    pub fn global() -> &'static Self {
        SETTINGS.get_or_init(|| {
            match Self::load().context("failed to load config and command line arguments") {
                Ok(settings) => settings,
                Err(err) => {
                    // tracing wasn't setup yet
                    panic!("{:#?}", err);
                }
            }
        })
    }

    fn load() -> Result<Self> {
        let opts = App::new(clap::crate_name!())
            .version(clap::crate_version!())
            .about(clap::crate_description!())
            .args(&[
                Arg::new("config")
                    .help("path of config file")
                    .takes_value(true)
                    .short('c')
                    .long("config")
                    .default_value("./config.yaml"),
                Arg::new("debug")
                    .help("enable debug logging")
                    .long("debug"),
            ])
            .get_matches();

        let config_path = opts.value_of("config").unwrap();

        let conf = Config::builder()
            .set_default("receiver.bind_address", "0.0.0.0")?
            .set_default("receiver.port", 80_i64)?
            .set_default("broker.addr", "localhost:61616")?
            .set_default("broker.login", "admin")?
            .set_default("broker.passcode", "admin")?
            .set_default("log.debug", false)?
            .add_source(File::with_name(config_path).required(false))
            .add_source(Environment::with_prefix("FORWARDER").separator("__"))
            .build()
            .context("can't load config")?;

        let mut settings: Settings = conf.try_deserialize().context("can't load config")?;

        if opts.is_present("debug") {
            settings.log.debug = true;
        }

        Ok(settings)
    }
}
