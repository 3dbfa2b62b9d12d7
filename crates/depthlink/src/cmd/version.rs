use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("depthlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: depthlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("DEPTHLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: peer={}, async={}, cli=true",
        cfg!(feature = "peer"),
        cfg!(feature = "async")
    );
    println!(
        "wire: port={} color={}x{} depth={}x{} float32",
        depthlink_transport::DEFAULT_PORT,
        depthlink_frame::COLOR_WIDTH,
        depthlink_frame::COLOR_HEIGHT,
        depthlink_frame::DEPTH_WIDTH,
        depthlink_frame::DEPTH_HEIGHT,
    );

    Ok(SUCCESS)
}
