//! Stevedore - container and key-value adapters
//!
//! This is the CLI entry point for Stevedore.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;
use stevedore::config::Config;
use stevedore::docker::{base_images, ContainerSpec, DockerClient};
use stevedore::etcd::{EtcdClient, EventType, TxnOp};
use stevedore::lines::read_lines;
use tracing_subscriber::EnvFilter;

/// Stevedore - Docker and etcd from the command line
#[derive(Parser)]
#[command(name = "stevedore")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Thin adapters over a Docker daemon and an etcd cluster", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Config file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Docker daemon endpoint
    #[arg(long, global = true)]
    docker_host: Option<String>,

    /// Comma-separated etcd endpoints
    #[arg(long, global = true)]
    etcd_endpoints: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage images
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },

    /// Manage containers
    Container {
        #[command(subcommand)]
        command: ContainerCommands,
    },

    /// Talk to etcd
    Kv {
        #[command(subcommand)]
        command: KvCommands,
    },

    /// Print a file line by line
    Lines {
        /// File to read
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum ImageCommands {
    /// Pull an image
    Pull {
        /// Image name
        name: String,
    },
    /// Build an image
    Build {
        /// Build context path
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Image name
        #[arg(short, long)]
        name: String,
        /// Image tag
        #[arg(short, long, default_value = "latest")]
        tag: String,
        /// Dockerfile name inside the context
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Push an image
    Push {
        /// Image name
        name: String,
        /// Image tag
        #[arg(short, long, default_value = "latest")]
        tag: String,
    },
    /// Remove an image
    #[command(name = "rm")]
    Remove {
        /// Image ID or name
        image: String,
    },
    /// Check whether the daemon has an image
    Exists {
        /// Image name
        image: String,
    },
    /// List base images of a build context's Dockerfile
    Bases {
        /// Build context path
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Print the registry image name for a user's service
    Name {
        /// Username
        username: String,
        /// Service name
        service: String,
        /// Version tag
        #[arg(long)]
        version: Option<String>,
    },
}

#[derive(Subcommand)]
enum ContainerCommands {
    /// Run a container, pulling the image if needed
    Run {
        /// Image to run
        image: String,
        /// Container name
        #[arg(long)]
        name: Option<String>,
        /// Environment variable
        #[arg(short, long)]
        env: Vec<String>,
        /// Bind mount (host:container)
        #[arg(short, long)]
        volume: Vec<String>,
        /// Label
        #[arg(short, long)]
        label: Vec<String>,
        /// Working directory
        #[arg(short, long)]
        workdir: Option<String>,
        /// Network mode
        #[arg(long)]
        network: Option<String>,
        /// Run privileged
        #[arg(long)]
        privileged: bool,
        /// Command to run
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Stop a container
    Stop {
        /// Container ID or name
        container: String,
    },
    /// Remove a container
    #[command(name = "rm")]
    Remove {
        /// Container ID or name
        container: String,
    },
    /// Stop and remove a container
    Down {
        /// Container ID or name
        container: String,
    },
}

#[derive(Subcommand)]
enum KvCommands {
    /// Read a key
    Get {
        key: String,
        /// Read every key under the prefix
        #[arg(short, long)]
        prefix: bool,
    },
    /// Write a key
    Put { key: String, value: String },
    /// Delete a key
    #[command(name = "del")]
    Delete {
        key: String,
        /// Delete every key under the prefix
        #[arg(short, long)]
        prefix: bool,
    },
    /// Exit non-zero unless exactly one value exists at the key
    Has { key: String },
    /// Print changes under a prefix until interrupted
    Watch { prefix: String },
    /// Apply operations atomically
    Txn {
        /// put:KEY=VALUE, del:KEY or del-prefix:KEY, applied in order
        #[arg(long = "op", required = true)]
        ops: Vec<String>,
    },
}

fn parse_txn_op(op: &str) -> anyhow::Result<TxnOp> {
    let Some((kind, rest)) = op.split_once(':') else {
        bail!("invalid operation '{}': expected KIND:ARGS", op);
    };

    match kind {
        "put" => {
            let (key, value) = rest
                .split_once('=')
                .with_context(|| format!("invalid put '{}': expected KEY=VALUE", rest))?;
            Ok(TxnOp::Put {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
        "del" => Ok(TxnOp::Delete {
            key: rest.to_string(),
            with_prefix: false,
        }),
        "del-prefix" => Ok(TxnOp::Delete {
            key: rest.to_string(),
            with_prefix: true,
        }),
        other => bail!("unknown operation kind '{}'", other),
    }
}

fn parse_pairs(pairs: &[String]) -> Vec<(&str, &str)> {
    pairs.iter().filter_map(|p| p.split_once('=')).collect()
}

async fn docker_client(config: &Config) -> anyhow::Result<DockerClient> {
    let client = DockerClient::connect(
        &config.docker.endpoint,
        config.docker.cert_path.as_deref(),
        &config.registry,
        config.docker.timeout_secs,
    )
    .await
    .with_context(|| format!("connecting to docker daemon {}", config.docker.endpoint))?;
    Ok(client)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = cli.docker_host {
        config.docker.endpoint = host;
    }
    if let Some(endpoints) = cli.etcd_endpoints {
        config.etcd.endpoints = endpoints.split(',').map(|s| s.trim().to_string()).collect();
    }
    config.validate()?;

    match cli.command {
        Commands::Image { command } => match command {
            ImageCommands::Pull { name } => {
                docker_client(&config).await?.pull_image(&name).await?;
                println!("Pulled {}", name);
            }
            ImageCommands::Build {
                path,
                name,
                tag,
                file,
            } => {
                let client = docker_client(&config).await?;
                let mut stdout = std::io::stdout();
                client
                    .build_image(&name, &tag, &path, file.as_deref(), &mut stdout)
                    .await?;
                println!("Successfully built {}:{}", name, tag);
            }
            ImageCommands::Push { name, tag } => {
                let client = docker_client(&config).await?;
                let mut stdout = std::io::stdout();
                client.push_image(&name, &tag, &mut stdout).await?;
            }
            ImageCommands::Remove { image } => {
                docker_client(&config).await?.remove_image(&image).await?;
                println!("{}", image);
            }
            ImageCommands::Exists { image } => {
                if !docker_client(&config).await?.is_image_present(&image).await? {
                    println!("{} not present", image);
                    std::process::exit(1);
                }
                println!("{} present", image);
            }
            ImageCommands::Bases { path } => {
                for base in base_images(&path)? {
                    match base.alias {
                        Some(alias) => println!("{} AS {}", base.image, alias),
                        None => println!("{}", base.image),
                    }
                }
            }
            ImageCommands::Name {
                username,
                service,
                version,
            } => {
                let client = DockerClient::new(
                    &config.docker.endpoint,
                    config.docker.cert_path.as_deref(),
                    &config.registry,
                    config.docker.timeout_secs,
                )?;
                match version {
                    Some(v) => println!("{}", client.image_name_with_tag(&username, &service, &v)),
                    None => println!("{}", client.image_name_no_tag(&username, &service)),
                }
            }
        },

        Commands::Container { command } => {
            let client = docker_client(&config).await?;

            match command {
                ContainerCommands::Run {
                    image,
                    name,
                    env,
                    volume,
                    label,
                    workdir,
                    network,
                    privileged,
                    command,
                } => {
                    let container_name = name.unwrap_or_else(|| {
                        format!("stevedore-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
                    });

                    let mut spec = ContainerSpec::new(&image).name(&container_name);
                    for (key, value) in parse_pairs(&env) {
                        spec = spec.env(key, value);
                    }
                    for (key, value) in parse_pairs(&label) {
                        spec = spec.label(key, value);
                    }
                    spec.binds = volume;
                    spec.cmd = command;
                    spec.working_dir = workdir;
                    spec.network_mode = network;
                    spec.privileged = privileged;

                    let id = client.run_container(&spec).await?;
                    println!("{}", id);
                }
                ContainerCommands::Stop { container } => {
                    client.stop_container(&container).await?;
                    println!("{}", container);
                }
                ContainerCommands::Remove { container } => {
                    client.remove_container(&container).await?;
                    println!("{}", container);
                }
                ContainerCommands::Down { container } => {
                    client.stop_and_remove_container(&container).await?;
                    println!("{}", container);
                }
            }
        }

        Commands::Kv { command } => {
            let client = EtcdClient::from_config(&config.etcd);

            match command {
                KvCommands::Get { key, prefix } => {
                    let resp = client.get(&key, prefix).await?;
                    for kv in resp.kvs {
                        println!("{} : {}", kv.key_str(), kv.value_str());
                    }
                }
                KvCommands::Put { key, value } => {
                    let resp = client.put(&key, &value).await?;
                    println!("OK (revision {})", resp.header.revision);
                }
                KvCommands::Delete { key, prefix } => {
                    let resp = client.delete(&key, prefix).await?;
                    for kv in &resp.prev_kvs {
                        println!("{} : {}", kv.key_str(), kv.value_str());
                    }
                    println!("{}", resp.deleted);
                }
                KvCommands::Has { key } => {
                    if !client.has_entry(&key).await {
                        std::process::exit(1);
                    }
                }
                KvCommands::Watch { prefix } => {
                    let mut watcher = client.watch(&prefix).await?;
                    loop {
                        tokio::select! {
                            event = watcher.next() => match event {
                                Some(Ok(event)) => match event.kind {
                                    EventType::Put => println!("PUT {} : {}", event.kv.key_str(), event.kv.value_str()),
                                    EventType::Delete => println!("DELETE {}", event.kv.key_str()),
                                },
                                Some(Err(e)) => return Err(e.into()),
                                None => break,
                            },
                            _ = tokio::signal::ctrl_c() => break,
                        }
                    }
                }
                KvCommands::Txn { ops } => {
                    let mut txn = client.txn();
                    for op in &ops {
                        match parse_txn_op(op)? {
                            TxnOp::Put { key, value } => txn.put(&key, &value),
                            TxnOp::Delete { key, with_prefix } => txn.delete(&key, with_prefix),
                        };
                    }
                    let resp = txn.commit().await?;
                    println!(
                        "{} (revision {})",
                        if resp.succeeded { "SUCCESS" } else { "FAILURE" },
                        resp.header.revision
                    );
                }
            }
        }

        Commands::Lines { file } => {
            let file =
                File::open(&file).with_context(|| format!("opening {}", file.display()))?;
            for line in read_lines(file) {
                print!("{}", line);
            }
        }
    }

    Ok(())
}
