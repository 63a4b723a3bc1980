#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use anyhow::{bail, Context, Result};
use argh::FromArgs;

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use sunset_sftp::{Attrs, Client, Error, IoStream, Server, SftpConfig};

/// Sleep when a socket would block
const POLL: Duration = Duration::from_millis(2);

#[derive(FromArgs, Debug)]
/** Sunset SFTP demo, speaking SFTP directly over TCP
 */
struct Args {
    #[argh(switch, short = 'v')]
    /// verbose debug logging
    debug: bool,

    #[argh(switch)]
    /// more verbose
    trace: bool,

    #[argh(subcommand)]
    cmd: Cmd,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Cmd {
    Serve(ServeArgs),
    Client(ClientArgs),
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "serve")]
/// serve a directory
struct ServeArgs {
    #[argh(option, short = 'p', default = "2244")]
    /// port to listen on
    port: u16,

    #[argh(option, short = 'd', default = "String::from(\"/\")")]
    /// directory that relative paths are resolved against
    dir: String,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "client")]
/// run a command against a server.
/// get|put <from> <to>, ls [dir], mkdir <dir>, rm <file>, mv <old> <new>, stat <path>
struct ClientArgs {
    #[argh(option, default = "String::from(\"localhost\")")]
    /// server host
    host: String,

    #[argh(option, short = 'p', default = "2244")]
    /// server port
    port: u16,

    #[argh(positional)]
    /// command to run
    command: String,

    #[argh(positional)]
    /// command arguments
    args: Vec<String>,
}

/// Repeats `f` until it doesn't return `WouldBlock`
fn block<T>(mut f: impl FnMut() -> sunset_sftp::Result<T>) -> Result<T> {
    loop {
        match f() {
            Err(Error::WouldBlock) => std::thread::sleep(POLL),
            r => return Ok(r?),
        }
    }
}

fn session(conn: TcpStream, peer: SocketAddr, conf: SftpConfig) -> Result<()> {
    conn.set_nonblocking(true)?;
    let mut serv = Server::new(IoStream::new(conn), conf)?;
    block(|| serv.accept())?;
    info!("{peer} connected");
    let r = loop {
        match serv.process() {
            Ok(()) => (),
            Err(Error::WouldBlock) => std::thread::sleep(POLL),
            Err(Error::ConnectionLost) => {
                info!("{peer} disconnected");
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };
    serv.close();
    Ok(r?)
}

fn serve(args: ServeArgs) -> Result<()> {
    let conf = SftpConfig::new().default_dir(&args.dir);
    conf.validate().context("bad --dir, must be absolute")?;
    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .with_context(|| format!("listening on port {}", args.port))?;
    info!("serving {} on port {}", args.dir, args.port);
    for conn in listener.incoming() {
        let conn = conn?;
        let peer = conn.peer_addr()?;
        let conf = conf.clone();
        std::thread::spawn(move || {
            if let Err(e) = session(conn, peer, conf) {
                warn!("{peer} session failed: {e:#}");
            }
        });
    }
    Ok(())
}

fn client(args: ClientArgs) -> Result<()> {
    let conn = TcpStream::connect((args.host.as_str(), args.port))
        .with_context(|| format!("connecting to {}:{}", args.host, args.port))?;
    conn.set_nonblocking(true)?;
    let mut cli = Client::new(IoStream::new(conn), SftpConfig::new())?;
    let v = block(|| cli.connect())?;
    debug!("server version {v}");

    let cmd = args.command.as_str();
    let a = &args.args;
    let arg = |n: usize| {
        a.get(n).map(String::as_str).with_context(|| format!("{cmd} needs {} arguments", n + 1))
    };

    match cmd {
        "get" | "put" => {
            let (from, to) = (arg(0)?, arg(1)?);
            let mut progress = |o: u64| trace!("{o} bytes");
            let r = if cmd == "get" {
                block(|| cli.get(from, to, false, &mut progress))?
            } else {
                block(|| cli.put(from, to, false, &mut progress))?
            };
            println!("{from} -> {to}: {} bytes", r.offset());
        }
        "ls" => {
            let dir = a.first().map(String::as_str).unwrap_or(".");
            for e in block(|| cli.ls(dir))? {
                println!("{}", e.longname);
            }
        }
        "mkdir" => {
            let dir = arg(0)?;
            block(|| cli.mkdir(dir, &Attrs::default()))?;
        }
        "rm" => {
            let path = arg(0)?;
            block(|| cli.remove(path))?;
        }
        "mv" => {
            let (old, new) = (arg(0)?, arg(1)?);
            block(|| cli.rename(old, new))?;
        }
        "stat" => {
            let path = arg(0)?;
            let attrs = block(|| cli.stat(path))?;
            println!("{attrs:#?}");
        }
        _ => bail!("unknown command {cmd}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();

    let level = if args.trace {
        log::LevelFilter::Trace
    } else if args.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::builder().filter_level(level).format_timestamp_nanos().init();

    match args.cmd {
        Cmd::Serve(a) => serve(a),
        Cmd::Client(a) => client(a),
    }
}
