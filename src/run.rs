use crate::driver::Driver;
use crate::options::DriverOptions;
use crate::trace;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(lifecycle: bool) {
    let mut filter = EnvFilter::from_default_env();
    if lifecycle {
        if let Ok(directive) = "stone_driver=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }
    // A subscriber may already be installed when embedded, e.g. in tests.
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .with(filter)
        .try_init();
}

fn run_impl(args: &[String]) -> anyhow::Result<i32> {
    let opts = match DriverOptions::parse_args(args) {
        Ok(opts) => opts,
        Err(early) => {
            return Ok(match early.status {
                Ok(()) => {
                    println!("{}", early.output);
                    0
                }
                Err(()) => {
                    eprintln!("{}", early.output);
                    1
                }
            });
        }
    };
    init_logging(opts.driver_print_lifecycle);

    if opts.version {
        println!("stone version {}", env!("CARGO_PKG_VERSION"));
        println!("target: {}", crate::triple::Triple::host());
        return Ok(0);
    }
    if let Some(path) = &opts.driver_trace {
        trace::open(path).map_err(|err| anyhow::anyhow!("open trace {}: {}", path, err))?;
    }
    Driver::new(opts).run()
}

/// Runs the driver on the process's command line, returning the exit code.
pub fn run() -> anyhow::Result<i32> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let res = run_impl(&args);
    trace::close()?;
    res
}
