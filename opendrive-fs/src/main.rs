use anyhow::Context;
use log::info;
use opendrive_fs::{DirEntry, FsError, HashType, ObjectInfo, OpenDriveFs, RemoteConfig, obscure};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    List { dir: String, depth: Option<usize> },
    Mkdir(String),
    Rmdir(String),
    Purge(String),
    Put { local: String, remote: String },
    Cat(String),
    Remove(String),
    Copy { src: String, dst: String },
    Obscure(String),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(CliMode::Help);
    };
    let rest: Vec<String> = args.collect();
    let one = |name: &str| -> anyhow::Result<String> {
        match rest.as_slice() {
            [value] => Ok(value.clone()),
            _ => anyhow::bail!("usage: opendrive {name} <path>"),
        }
    };
    let mode = match command.as_str() {
        "ls" => match rest.as_slice() {
            [] => CliMode::List { dir: String::new(), depth: Some(1) },
            [dir] => CliMode::List { dir: dir.clone(), depth: Some(1) },
            [dir, depth] => {
                let depth: usize = depth
                    .parse()
                    .with_context(|| format!("invalid depth: {depth}"))?;
                CliMode::List {
                    dir: dir.clone(),
                    depth: (depth > 0).then_some(depth),
                }
            }
            _ => anyhow::bail!("usage: opendrive ls [path] [depth]"),
        },
        "mkdir" => CliMode::Mkdir(one("mkdir")?),
        "rmdir" => CliMode::Rmdir(one("rmdir")?),
        "purge" => CliMode::Purge(one("purge")?),
        "cat" => CliMode::Cat(one("cat")?),
        "rm" => CliMode::Remove(one("rm")?),
        "obscure" => CliMode::Obscure(one("obscure")?),
        "put" => match rest.as_slice() {
            [local, remote] => CliMode::Put { local: local.clone(), remote: remote.clone() },
            _ => anyhow::bail!("usage: opendrive put <local> <remote>"),
        },
        "copy" => match rest.as_slice() {
            [src, dst] => CliMode::Copy { src: src.clone(), dst: dst.clone() },
            _ => anyhow::bail!("usage: opendrive copy <src> <dst>"),
        },
        "--help" | "-h" | "help" => CliMode::Help,
        other => anyhow::bail!("unknown command: {other}"),
    };
    Ok(mode)
}

fn print_usage() {
    println!("Usage: opendrive <command> [args]");
    println!("  ls [path] [depth]      List a folder (depth 0 walks the whole tree)");
    println!("  mkdir <path>           Create a folder and its parents");
    println!("  rmdir <path>           Remove an empty folder");
    println!("  purge <path>           Remove a folder and its contents");
    println!("  put <local> <remote>   Upload a local file");
    println!("  cat <remote>           Write a remote file to stdout");
    println!("  rm <remote>            Remove a remote file");
    println!("  copy <src> <dst>       Copy a file on the service");
    println!("  obscure <password>     Print the obscured form for OPENDRIVE_PASSWORD");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mode = parse_cli_mode(std::env::args())?;
    match mode {
        CliMode::Help => {
            print_usage();
            return Ok(());
        }
        CliMode::Obscure(password) => {
            println!("{}", obscure(&password));
            return Ok(());
        }
        _ => {}
    }

    let config = RemoteConfig::from_env().context("failed to load remote config")?;
    let fs = match OpenDriveFs::new(config.clone()).await {
        Ok(fs) => fs,
        Err(FsError::IsFile { parent_root, leaf }) => {
            info!("root points at file {leaf:?}, using {parent_root:?}");
            OpenDriveFs::new(config.with_root(parent_root))
                .await
                .context("failed to open remote")?
        }
        Err(err) => return Err(err).context("failed to open remote"),
    };

    let cancel = fs.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    run(&fs, mode).await
}

async fn run(fs: &OpenDriveFs, mode: CliMode) -> anyhow::Result<()> {
    match mode {
        CliMode::List { dir, depth } => {
            let mut lister = fs
                .list(&dir, depth)
                .await
                .with_context(|| format!("failed to list {dir:?}"))?;
            while let Some(entry) = lister.next().await? {
                match entry {
                    DirEntry::Dir(dir) => println!("{:>12}  {}/", "-", dir.remote),
                    DirEntry::Object(object) => {
                        let md5 = object.hash(HashType::Md5)?;
                        println!("{:>12}  {}  {md5}", object.size(), object.remote());
                    }
                }
            }
        }
        CliMode::Mkdir(dir) => fs.mkdir(&dir).await?,
        CliMode::Rmdir(dir) => fs.rmdir(&dir).await?,
        CliMode::Purge(dir) => fs.purge(&dir).await?,
        CliMode::Put { local, remote } => {
            let metadata = tokio::fs::metadata(&local)
                .await
                .with_context(|| format!("failed to stat {local}"))?;
            let mod_time = metadata
                .modified()
                .map(OffsetDateTime::from)
                .unwrap_or_else(|_| OffsetDateTime::now_utc());
            let mut file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("failed to open {local}"))?;
            let info = ObjectInfo::new(remote.clone(), metadata.len(), mod_time);
            let object = fs
                .put(&mut file, &info)
                .await
                .with_context(|| format!("failed to upload {local} to {remote}"))?;
            println!("{} {} {}", object.id(), object.size(), object.hash(HashType::Md5)?);
        }
        CliMode::Cat(remote) => {
            let object = fs.new_object(&remote).await?;
            let mut reader = object.open().await?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut reader, &mut stdout).await?;
        }
        CliMode::Remove(remote) => fs.new_object(&remote).await?.remove().await?,
        CliMode::Copy { src, dst } => {
            let object = fs.new_object(&src).await?;
            let copied = fs
                .copy(&object, &dst)
                .await
                .with_context(|| format!("failed to copy {src} to {dst}"))?;
            println!("{} {}", copied.id(), copied.remote());
        }
        CliMode::Obscure(_) | CliMode::Help => {}
    }
    Ok(())
}
