use std::net::UdpSocket;

use clap::Parser;
use tracing::{debug, info};

use paris_traceroute::algorithm::mda::Mda;
use paris_traceroute::algorithm::traceroute::Traceroute;
use paris_traceroute::args::{Algorithm, Format};
use paris_traceroute::event::EventLoop;
use paris_traceroute::net::NetworkIo;
use paris_traceroute::output::{json, text, xml, Report};
use paris_traceroute::probe::Address;
use paris_traceroute::resolve::Resolver;
use paris_traceroute::{Args, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::try_from(args)?;

    let filter = if config.debug { "paris_traceroute=debug" } else { "paris_traceroute=info" };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    info!(target = %config.target, algorithm = ?config.algorithm, "starting trace");

    let resolver = Resolver::new();
    let dst = resolver.resolve(&config.target, config.want_v6).await?;
    let src = local_address_for(dst)?;
    debug!(%src, %dst, "resolved endpoints");

    let net = NetworkIo::new(config.rate_interval)?;
    let mut event_loop = EventLoop::new(net, dst);

    let report = match config.algorithm {
        Algorithm::ParisTraceroute => {
            let mut traceroute = Traceroute::new(config.traceroute, src, dst);
            event_loop.run(&mut traceroute, |subevent| debug!("{subevent}")).await?;
            Report::from_traceroute(src, dst, config.protocol, &traceroute.hops)
        }
        Algorithm::Mda => {
            let mut mda = Mda::new(config.mda, src, dst);
            event_loop.run(&mut mda, |subevent| debug!("{subevent}")).await?;
            Report::from_lattice(src, dst, config.protocol, &mda.lattice, config.mda.max_ttl, config.mda.src_port, config.mda.dst_port)
        }
    };

    match config.format {
        Format::Default => println!("{}", text::render(&report)),
        Format::Json => println!("{}", json::render(&report, config.sorted)),
        Format::Xml => println!("{}", xml::render(&report, config.sorted)),
    }

    Ok(())
}

/// The source address the kernel would actually route through to `dst`,
/// found the usual way: connect a UDP socket and read back its local
/// address, never sending a single datagram.
fn local_address_for(dst: Address) -> anyhow::Result<Address> {
    let (bind_addr, connect_addr) = match dst {
        Address::V4(a) => ("0.0.0.0:0".to_string(), std::net::SocketAddr::V4(std::net::SocketAddrV4::new(a, 0))),
        Address::V6(a) => ("[::]:0".to_string(), std::net::SocketAddr::V6(std::net::SocketAddrV6::new(a, 0, 0, 0))),
    };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(connect_addr)?;
    Ok(socket.local_addr()?.ip().into())
}
