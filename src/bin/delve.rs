use std::env;
use std::net::Ipv4Addr;
use std::process::exit;
use std::sync::Arc;
use std::thread;

use getopts::Options;

use delve::dns::cache::SynchronizedCache;
use delve::dns::context::{ServerContext, DEFAULT_CACHE_SIZE, DEFAULT_CACHE_TTL};
use delve::dns::server::DnsUdpServer;

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn parse_or_exit<T: std::str::FromStr>(value: &str, what: &str) -> T {
    match value.parse() {
        Ok(x) => x,
        Err(_) => {
            eprintln!("invalid {}: {}", what, value);
            exit(1);
        }
    }
}

fn main() {
    simple_logger::init().expect("Failed to initialize logger");

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("a", "address", "listen address (default 0.0.0.0)", "ADDRESS");
    opts.optopt("p", "port", "listen port (default 53)", "PORT");
    opts.optmulti(
        "r",
        "root-hint",
        "root nameserver address, may be given more than once (default: the IANA root servers)",
        "IP",
    );
    opts.optopt(
        "",
        "cache-size",
        "maximum number of cached replies (default 128)",
        "COUNT",
    );
    opts.optopt(
        "",
        "cache-ttl",
        "lifetime of a cached reply in seconds (default 600)",
        "SECONDS",
    );
    opts.optopt("t", "threads", "number of request handler threads (default 4)", "COUNT");

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            exit(1);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let mut context = ServerContext::new();

    if let Some(address) = opt_matches.opt_str("a") {
        context.listen_address = address;
    }
    if let Some(port) = opt_matches.opt_str("p") {
        context.dns_port = parse_or_exit(&port, "port");
    }

    let hints: Vec<Ipv4Addr> = opt_matches
        .opt_strs("r")
        .iter()
        .map(|hint| parse_or_exit(hint, "root hint"))
        .collect();
    if !hints.is_empty() {
        context.root_hints = hints;
    }

    let cache_size = opt_matches
        .opt_str("cache-size")
        .map(|v| parse_or_exit(&v, "cache size"))
        .unwrap_or(DEFAULT_CACHE_SIZE);
    let cache_ttl = opt_matches
        .opt_str("cache-ttl")
        .map(|v| parse_or_exit(&v, "cache ttl"))
        .unwrap_or(DEFAULT_CACHE_TTL);
    context.cache = SynchronizedCache::new(cache_size, cache_ttl);

    let thread_count = opt_matches
        .opt_str("t")
        .map(|v| parse_or_exit(&v, "thread count"))
        .unwrap_or(4);

    log::info!(
        "listening on {}:{} with {} root hints",
        context.listen_address,
        context.dns_port,
        context.root_hints.len()
    );

    let server = DnsUdpServer::new(Arc::new(context), thread_count);
    if let Err(err) = server.run_server() {
        log::error!("failed to start server: {}", err);
        exit(1);
    }

    loop {
        thread::park();
    }
}
