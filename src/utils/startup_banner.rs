use crate::config::{AppConfig, ConfigSource};

pub fn print_startup_banner(config: &AppConfig, source: &ConfigSource) {
    const RESET: &str = "\x1b[0m";
    const BANNER_COLOR: &str = "\x1b[38;5;172m";
    const DIM_GRAY: &str = "\x1b[2;90m";
    const BANNER: &str = r#"
    ___       signal-queue
   | R |
   | Y |      writers push lamp states, readers drain them
   | G |
    \_/
     |"#;
    const APP_DESCRIPTION: &str =
        "Bounded in-memory signal queue for reader and writer clients over TCP.";
    const LIABILITY_NOTICE: &str =
        "MIT License disclaimer: software is provided \"AS IS\", without warranty or liability.";

    println!("{BANNER_COLOR}{BANNER}{RESET}");
    println!();
    println!(
        "{} v{} | build {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("SIGNAL_QUEUE_BUILD_DATE_UTC")
    );
    println!("{APP_DESCRIPTION}");
    println!(
        "config: {source} | workers: {} | queue capacity: {}",
        config.pool.workers, config.queue.capacity
    );
    println!("{DIM_GRAY}{LIABILITY_NOTICE}{RESET}");
    println!();
    println!("================================================================");
    println!();
}
