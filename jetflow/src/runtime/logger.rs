use std::path::Path;
use std::str::FromStr;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::Append;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

/// init log4rs with a console appender. level value: ["OFF", "ERROR",
/// "WARN", "INFO", "DEBUG", "TRACE"], ignore ascii case
pub fn init_log(level: &str) {
    init(level, None)
}

/// init log4rs with a size-rolled file appender, for cluster members
pub fn init_file_log(level: &str, work_dir: &Path) {
    init(level, Some(work_dir))
}

fn init(level: &str, work_dir: Option<&Path>) {
    let default_level = LevelFilter::from_str(level).expect("can not parse log level");

    let encoder =
        PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} {level} [{thread}] {target} - {m}{n}");

    let (name, appender) = match work_dir {
        Some(dir) => ("rolling_file", create_rolling_file_appender(encoder, dir)),
        None => ("console", create_console_appender(encoder)),
    };

    let config = Config::builder()
        .appender(Appender::builder().build(name, appender))
        .build(Root::builder().appender(name).build(default_level))
        .unwrap();

    log4rs::init_config(config).unwrap();
}

fn create_console_appender(encoder: PatternEncoder) -> Box<dyn Append> {
    let stdout = ConsoleAppender::builder()
        .target(Target::Stdout)
        .encoder(Box::new(encoder))
        .build();
    Box::new(stdout)
}

fn create_rolling_file_appender(encoder: PatternEncoder, work_dir: &Path) -> Box<dyn Append> {
    let path = work_dir.join("member.log");
    let roll_path = path.to_str().unwrap().to_string() + ".{}";

    let trigger = SizeTrigger::new(50 * 1024 * 1024);

    let roll = FixedWindowRoller::builder()
        .base(1)
        .build(roll_path.as_str(), 20)
        .expect("log roll error");

    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roll));

    let rolling_file = RollingFileAppender::builder()
        .encoder(Box::new(encoder))
        .append(true)
        .build(path, Box::new(policy))
        .unwrap();
    Box::new(rolling_file)
}
