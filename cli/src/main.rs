mod demo;

use std::io::Write;
use std::path::Path;
use std::time::Duration;
use std::{env, fs, fs::OpenOptions};

use cipherscore_fhe::Keypair;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let cmd = &args[1];

    match cmd.as_str() {
        "demo" => {
            let config = parse_demo_args(&args[2..]);
            if let Err(e) = demo::run_demo(config).await {
                eprintln!("❌ Error running demo: {}", e);
                std::process::exit(1);
            }
        }
        "genkey" => {
            let filename = args.get(2).cloned();
            if let Err(e) = genkey(filename) {
                eprintln!("❌ Error generating key: {}", e);
                std::process::exit(1);
            }
        }
        "address" => {
            if args.len() < 3 {
                println!("Usage: address <keyfile>");
                return;
            }
            if let Err(e) = show_address(&args[2]) {
                eprintln!("❌ Error reading key: {}", e);
                std::process::exit(1);
            }
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            println!("❌ Unknown command: {}", cmd);
            println!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("Cipherscore CLI - Confidential Score Ledger Tool");
    println!();
    println!("USAGE:");
    println!("  cipherscore <command> [args]");
    println!();
    println!("COMMANDS:");
    println!("  demo [options]             Run the full submit/decrypt lifecycle locally");
    println!("  genkey [filename]          Generate a new player keypair");
    println!("  address <keyfile>          Print the address of a stored keypair");
    println!("  help                       Show this help message");
    println!();
    println!("DEMO OPTIONS:");
    println!("  --chain-id <id>            Chain id for input binding (default: 31337)");
    println!("  --scores <a,b,c>           Submission sequence for the first player");
    println!("  --rival <score>            Score submitted by the second player");
    println!("  --ttl <seconds>            Decryption authorization lifetime");
    println!();
    println!("EXAMPLES:");
    println!("  cipherscore demo                     # Default two-player walkthrough");
    println!("  cipherscore demo --scores 5,120,60   # Custom submission sequence");
    println!("  cipherscore genkey player.json       # Generate keypair");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("  RUST_LOG             Log level (debug/info/warn/error)");
}

fn parse_demo_args(args: &[String]) -> demo::DemoConfig {
    let mut config = demo::DemoConfig::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--chain-id" => {
                if let Some(id) = args.get(i + 1) {
                    if let Ok(id) = id.parse() {
                        config.chain_id = id;
                    }
                    i += 1;
                }
            }
            "--scores" => {
                if let Some(list) = args.get(i + 1) {
                    let scores: Vec<u32> =
                        list.split(',').filter_map(|s| s.trim().parse().ok()).collect();
                    if !scores.is_empty() {
                        config.scores = scores;
                    }
                    i += 1;
                }
            }
            "--rival" => {
                if let Some(score) = args.get(i + 1) {
                    if let Ok(score) = score.parse() {
                        config.rival_score = score;
                    }
                    i += 1;
                }
            }
            "--ttl" => {
                if let Some(secs) = args.get(i + 1) {
                    if let Ok(secs) = secs.parse() {
                        config.authorization_ttl = Duration::from_secs(secs);
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    config
}

fn genkey(filename: Option<String>) -> anyhow::Result<()> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Could not determine home directory"))?;

    let config_dir = Path::new(&home).join(".config").join("cipherscore");

    let key_filename = filename.unwrap_or_else(|| "id.json".to_string());
    let key_path = config_dir.join(&key_filename);

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
        println!("📁 Created directory: {}", config_dir.display());

        #[cfg(unix)]
        {
            let mut perms = fs::metadata(&config_dir)?.permissions();
            perms.set_mode(0o700);
            fs::set_permissions(&config_dir, perms)?;
        }
    }

    if key_path.exists() {
        return Err(anyhow::anyhow!(
            "File {} already exists. Remove it first or use a different filename.",
            key_path.display()
        ));
    }

    println!("🔐 Generating new keypair...");
    let key = Keypair::new_random();

    // JSON array of the 64 seed bytes.
    let json = serde_json::to_string(&key.to_seed().to_vec())?;

    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&key_path)?;

    #[cfg(unix)]
    {
        // chmod 600 (rw-------)
        let mut perms = f.metadata()?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&key_path, perms)?;
    }

    f.write_all(json.as_bytes())?;

    println!("✅ Wrote new keypair to {}", key_path.display());
    println!("🔑 Address: {}", key.address());

    Ok(())
}

fn show_address(path: &str) -> anyhow::Result<()> {
    let json = fs::read_to_string(path)?;
    let bytes: Vec<u8> = serde_json::from_str(&json)?;
    let seed: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("keyfile must contain exactly 64 seed bytes"))?;

    let key = Keypair::from_seed(&seed);
    println!("🔑 Address: {}", key.address());
    println!(
        "   Decryption public key: {}",
        hex::encode(key.decryption_public_key())
    );
    Ok(())
}
