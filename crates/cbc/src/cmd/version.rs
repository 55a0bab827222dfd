use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("cbc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: cbc");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CBC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("CBC_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("features: mux={}, cli=true", cfg!(feature = "mux"));
    println!(
        "protocol: max_frame={} max_payload={} channels={}",
        cbc_frame::MAX_FRAME_SIZE,
        cbc_frame::MAX_PAYLOAD,
        cbc_frame::CHANNEL_COUNT
    );

    Ok(SUCCESS)
}
