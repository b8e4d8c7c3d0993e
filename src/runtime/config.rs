//! Configuration Management
use config::Value;
use config::{File, Source};
use log::LevelFilter;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::str::FromStr;

pub fn config() -> &'static Config {
    &CONFIG
}

pub fn get_value(name: &str) -> Option<Value> {
    CONFIG.misc.get(name).cloned()
}

pub fn get<T: FromStr>(name: &str) -> Option<T> {
    CONFIG
        .misc
        .get(name)
        .and_then(|v| v.clone().into_string().ok())
        .and_then(|v| v.parse::<T>().ok())
}

pub fn get_or_default<T: FromStr>(name: &str, default: T) -> T {
    get(name).unwrap_or(default)
}

static CONFIG: Lazy<Config> = Lazy::new(|| {
    let mut settings = ::config::Config::builder();

    // user config
    if let Some(mut path) = dirs::config_dir() {
        path.push("radioflow");
        path.push("config.toml");

        settings = settings.add_source(File::from(path.clone()).required(false));
    }

    // project config
    settings =
        settings.add_source(File::new("config.toml", config::FileFormat::Toml).required(false));

    // env config
    settings = settings.add_source(config::Environment::with_prefix("radioflow"));

    // start from default config
    let mut c = Config::default();

    if let Ok(config) = settings.build().unwrap().collect() {
        for (k, v) in config.iter() {
            match k.as_str() {
                "multiprocess" => {
                    c.multiprocess = config_parse::<bool>(v);
                }
                "pipe_size" => {
                    c.pipe_size = config_parse::<usize>(v);
                }
                "log_level" => {
                    c.log_level = config_parse::<LevelFilter>(v);
                }
                _ => {
                    c.misc.insert(k.clone(), v.clone());
                }
            }
        }
    }

    c
});

#[derive(Debug)]
pub struct Config {
    /// Run with the process-per-block driver rather than the cooperative one.
    pub multiprocess: bool,
    /// Kernel pipe capacity requested for every edge, in bytes.
    pub pipe_size: usize,
    pub log_level: LevelFilter,
    misc: HashMap<String, Value>,
}

impl Default for Config {
    #[cfg(debug_assertions)]
    fn default() -> Self {
        Config {
            multiprocess: true,
            pipe_size: 65536,
            log_level: LevelFilter::Debug,
            misc: HashMap::new(),
        }
    }
    #[cfg(not(debug_assertions))]
    fn default() -> Self {
        Config {
            multiprocess: true,
            pipe_size: 65536,
            log_level: LevelFilter::Info,
            misc: HashMap::new(),
        }
    }
}

fn config_parse<T: FromStr>(v: &Value) -> T {
    match v.clone().into_string().unwrap().parse::<T>() {
        Ok(r) => r,
        _ => panic!("invalid config value {:?}", v),
    }
}
