use std::io::Write;

use chrono::Local;

pub fn init(crate_name: &str, level: &str) {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| super::default_directive(crate_name, level));
    let _ = env_logger::builder()
        .parse_filters(&directive)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.module_path().unwrap_or("<unnamed>"),
                &record.args()
            )
        })
        .try_init();
}
