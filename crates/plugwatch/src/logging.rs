use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

pub fn init_logging(verbose: bool) {
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("plugwatch")
        .build();

    let _ = TermLogger::init(
        level_for(verbose),
        config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}

fn level_for(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}
