mod fs;
mod root_hints;

use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process;

use dns_resolver::resolver::{ProxyRule, Resolver};
use dns_resolver::util::address::Address;
use dns_resolver::util::types::ProtocolMode;
use dns_types::protocol::types::{
    DomainName, Message, QueryClass, QueryType, Rcode, RecordClass, RecordType, ResourceRecord,
};
use dns_types::zones::types::Zone;

use crate::fs::load_zone_configuration;
use crate::root_hints::root_hints;

fn print_section(heading: &str, rrs: &[ResourceRecord]) {
    if rrs.is_empty() {
        return;
    }

    println!("\n;; {heading}");
    for rr in rrs {
        let rdata = Zone::default().serialise_rdata(&rr.rtype_with_data);
        println!(
            "{}\t{}\t{}\t{}\t{}",
            rr.name,
            rr.ttl,
            rr.rclass,
            rr.rtype_with_data.rtype(),
            rdata
        );
    }
}

fn print_answer(response: &Message) {
    if response.header.rcode == Rcode::NameError {
        println!("\n;; ANSWER");
        println!("; name does not exist");
    } else {
        print_section("ANSWER", &response.answers);
    }
    print_section("AUTHORITY", &response.authority);
}

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// DNS recursive lookup utility
struct Args {
    /// Domain name to resolve
    #[clap(value_parser)]
    domain: DomainName,

    /// Query type to resolve
    #[clap(default_value_t = QueryType::Record(RecordType::A), value_parser)]
    qtype: QueryType,

    /// Only answer queries for which this configuration is authoritative: do
    /// not perform recursive or forwarding resolution
    #[clap(long, action(clap::ArgAction::SetTrue))]
    authoritative_only: bool,

    /// Act as a forwarding resolver, not a recursive resolver: forward queries
    /// which can't be answered from local state to this nameserver
    #[clap(short, long, value_parser)]
    forward_address: Option<Ipv4Addr>,

    /// Path to a hosts file, can be specified more than once
    #[clap(short = 'a', long, value_parser)]
    hosts_file: Vec<PathBuf>,

    /// Path to a directory to read hosts files from, can be specified more than
    /// once
    #[clap(short = 'A', long, value_parser)]
    hosts_dir: Vec<PathBuf>,

    /// Path to a zone file, can be specified more than once
    #[clap(short = 'z', long, value_parser)]
    zone_file: Vec<PathBuf>,

    /// Path to a directory to read zone files from, can be specified more than
    /// once
    #[clap(short = 'Z', long, value_parser)]
    zones_dir: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let Some((zones, hosts_rrs)) = load_zone_configuration(
        &args.hosts_file,
        &args.hosts_dir,
        &args.zone_file,
        &args.zones_dir,
    )
    .await
    else {
        eprintln!("could not load configuration");
        process::exit(1);
    };

    let resolver = if args.authoritative_only {
        Resolver::local_only()
    } else if let Some(forward_address) = args.forward_address {
        let resolver = match Resolver::proxy().await {
            Ok(resolver) => resolver,
            Err(error) => {
                eprintln!("could not set up resolver: {error}");
                process::exit(1);
            }
        };
        resolver
            .set_proxies(vec![ProxyRule::Fallback(vec![Address::udp(
                forward_address.to_string(),
                53,
            )])])
            .await;
        resolver
    } else {
        Resolver::recursive(ProtocolMode::PreferV4, 53, &root_hints())
    };

    resolver.insert_zones(zones).await;
    resolver.seed(&hosts_rrs);

    println!(";; QUESTION");
    println!(
        "{}\t{}\t{}",
        args.domain,
        QueryClass::Record(RecordClass::IN),
        args.qtype
    );

    let fqdn = args.domain.to_dotted_string();
    match resolver.query(&fqdn, args.qtype, None).await {
        Ok((response, _from_cache)) => print_answer(&response),
        Err(err) => {
            println!("\n;; ANSWER");
            println!("; {err}");
            process::exit(1);
        }
    }
}
