use anyhow::Context;

/// Parsed agent subprocess contract arguments: `--room` names the
/// session/room to join, the rest configure the voice persona.
pub(crate) struct Args {
    pub room: String,
    pub voice_id: String,
    pub opening_line: Option<String>,
    pub system_prompt: Option<String>,
}

pub(crate) fn parse_args() -> anyhow::Result<Args> {
    let mut room = None;
    let mut voice_id = "Ashley".to_string();
    let mut opening_line = None;
    let mut system_prompt = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-V" | "--version" => {
                println!("orchestrator-agent {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("orchestrator-agent - voice session agent subprocess");
                println!();
                println!("USAGE:");
                println!("    agent --room <SESSION_ID> [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --room <SESSION_ID>          Room/session to join (required)");
                println!("    --voice-id <VOICE>           Voice persona [default: Ashley]");
                println!("    --opening-line <TEXT>        Opening line to speak first");
                println!("    --system-prompt <TEXT>       System prompt for the voice persona");
                println!("    -V, --version                Print version and exit");
                println!("    -h, --help                   Print this help and exit");
                std::process::exit(0);
            }
            "--room" => {
                i += 1;
                room = Some(args.get(i).context("Missing --room value")?.clone());
            }
            "--voice-id" => {
                i += 1;
                voice_id = args.get(i).context("Missing --voice-id value")?.clone();
            }
            "--opening-line" => {
                i += 1;
                opening_line = Some(args.get(i).context("Missing --opening-line value")?.clone());
            }
            "--system-prompt" => {
                i += 1;
                system_prompt = Some(
                    args.get(i)
                        .context("Missing --system-prompt value")?
                        .clone(),
                );
            }
            other => anyhow::bail!("Unknown argument: {other}"),
        }
        i += 1;
    }

    Ok(Args {
        room: room.context("--room is required")?,
        voice_id,
        opening_line,
        system_prompt,
    })
}
