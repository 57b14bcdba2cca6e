use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use portrait_contracts::prompt::{
    apply_composition, apply_style, apply_style_reference, describe, CharacterProfile, ART_STYLES,
    COMPOSITIONS,
};
use portrait_contracts::settings::PortraitSettings;
use portrait_contracts::store::PortraitIndexFile;
use portrait_engine::{
    list_style_references, load_reference_image, AspectRatio, GenerationRequest, Portrait,
    PortraitJob, PortraitService, PortraitWorker,
};
use tracing::debug;

const SETTINGS_FILE_NAME: &str = "settings.json";
/// Slack on top of the HTTP timeout for the image download and the write.
const COMPLETION_GRACE_S: f64 = 30.0;

#[derive(Debug, Parser)]
#[command(name = "pawn-portrait", version, about = "Generate and cache character portraits")]
struct Cli {
    /// Settings file; defaults to settings.json in the mod directory.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Show(ShowArgs),
    Styles,
    Describe(DescribeArgs),
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    identity: String,
    #[arg(long, conflicts_with = "profile", required_unless_present = "profile")]
    prompt: Option<String>,
    /// Character profile JSON used to compose the prompt.
    #[arg(long)]
    profile: Option<PathBuf>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    composition: Option<String>,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,
    /// Base file name; numbered instead of overwritten when taken.
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    subject: Option<PathBuf>,
    #[arg(long)]
    style_image: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ShowArgs {
    #[arg(long)]
    identity: String,
}

#[derive(Debug, Args)]
struct DescribeArgs {
    #[arg(long)]
    profile: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("pawn-portrait error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pawn_portrait=info,portrait_engine=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_deref())?;
    debug!(?settings, "settings loaded");
    match cli.command {
        Command::Generate(args) => run_generate(settings, args),
        Command::Show(args) => run_show(settings, args),
        Command::Styles => run_styles(&settings),
        Command::Describe(args) => run_describe(args),
    }
}

fn load_settings(path: Option<&Path>) -> Result<PortraitSettings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => PortraitSettings::default()
            .with_env_overrides()
            .mod_dir()
            .join(SETTINGS_FILE_NAME),
    };
    Ok(PortraitSettings::load(&path)?.with_env_overrides())
}

fn run_generate(settings: PortraitSettings, args: GenerateArgs) -> Result<i32> {
    let aspect_ratio: AspectRatio = args.aspect_ratio.parse()?;
    let prompt = compose_prompt(&args)?;
    let mut request = GenerationRequest::new(prompt)?.with_aspect_ratio(aspect_ratio);
    if let Some(path) = &args.subject {
        request = request.with_subject_image(load_reference_image(path)?);
    }
    if let Some(path) = &args.style_image {
        request = request.with_style_image(load_reference_image(path)?);
    }

    let wait = Duration::from_secs_f64(settings.request_timeout_s() + COMPLETION_GRACE_S);
    let store = PortraitIndexFile::open(settings.index_path());
    let service = PortraitService::from_settings(settings, store)?;
    let worker = PortraitWorker::spawn(service)?;
    worker.submit(PortraitJob::Generate {
        identity: args.identity.clone(),
        request,
        base_name: args.name.clone(),
    })?;
    let completion = worker.wait_completion(wait);
    let service = worker.shutdown()?;

    let Some(completion) = completion else {
        bail!("timed out waiting for portrait of {}", args.identity);
    };
    Ok(report(service.settings(), &completion.identity, completion.portrait.as_ref()))
}

fn run_show(settings: PortraitSettings, args: ShowArgs) -> Result<i32> {
    let store = PortraitIndexFile::open(settings.index_path());
    let mut service = PortraitService::from_settings(settings, store)?;
    let portrait = service.redisplay(&args.identity);
    Ok(report(service.settings(), &args.identity, portrait.as_ref()))
}

fn run_styles(settings: &PortraitSettings) -> Result<i32> {
    let references = list_style_references(&settings.cache_dir());
    if references.is_empty() {
        println!("no style references in {}", settings.cache_dir().display());
        return Ok(0);
    }
    for path in references {
        println!("{}", path.display());
    }
    Ok(0)
}

fn run_describe(args: DescribeArgs) -> Result<i32> {
    let profile = args.profile.as_deref().map(read_profile).transpose()?;
    println!("{}", describe(profile.as_ref()));
    Ok(0)
}

fn compose_prompt(args: &GenerateArgs) -> Result<String> {
    let mut prompt = match (&args.prompt, &args.profile) {
        (Some(prompt), _) => prompt.trim().to_string(),
        (None, Some(path)) => describe(Some(&read_profile(path)?)),
        (None, None) => bail!("either --prompt or --profile is required"),
    };
    if let Some(style) = &args.style {
        prompt = apply_style(&prompt, known_name(style, &ART_STYLES, "art style")?);
    }
    if let Some(composition) = &args.composition {
        prompt = apply_composition(&prompt, known_name(composition, &COMPOSITIONS, "composition")?);
    }
    if args.style_image.is_some() {
        prompt = apply_style_reference(&prompt, args.subject.is_some());
    }
    Ok(prompt)
}

fn known_name<'a>(raw: &str, known: &[&'a str], what: &str) -> Result<&'a str> {
    let wanted = raw.trim();
    known
        .iter()
        .copied()
        .find(|name| name.eq_ignore_ascii_case(wanted))
        .with_context(|| format!("unknown {what} '{wanted}' (expected one of: {})", known.join(", ")))
}

fn read_profile(path: &Path) -> Result<CharacterProfile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading profile {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid profile JSON in {}", path.display()))
}

fn report(settings: &PortraitSettings, identity: &str, portrait: Option<&Portrait>) -> i32 {
    let Some(portrait) = portrait else {
        eprintln!("no portrait for {identity}");
        return 1;
    };
    match &portrait.file_name {
        Some(file_name) => println!(
            "{} ({}x{})",
            settings.cache_dir().join(file_name).display(),
            portrait.width(),
            portrait.height()
        ),
        None => println!(
            "{identity}: {}x{} portrait (not saved)",
            portrait.width(),
            portrait.height()
        ),
    }
    0
}
