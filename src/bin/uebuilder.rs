use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use nu_ansi_term::Color;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use uebuilder_core::logging::init_logging;
use uebuilder_core::operations::{flags, prepare_output_directory};
use uebuilder_core::{
    build_command, execute, AppPaths, BuildRequest, EngineRegistry, ExtraOptions, OutputLine,
    Platform, PluginDescriptor, RunState, Settings, Severity,
};

#[derive(Parser)]
#[command(
    name = "uebuilder",
    version,
    about = "Rebuild Unreal Engine plugins for another engine version",
    long_about = "Finds installed Unreal Engine versions and runs RunUAT BuildPlugin to repackage \
                  a .uplugin against the chosen engine."
)]
struct Cli {
    /// Directory holding the engine registry and settings
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write logs to the config directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage known Unreal Engine installations
    #[command(subcommand)]
    Engines(EngineCommand),
    /// Inspect plugin descriptors
    #[command(subcommand)]
    Plugin(PluginCommand),
    /// Rebuild a plugin against a target engine
    Build(BuildArgs),
    /// Show or set the interface language
    Language {
        /// Language code to switch to (en, ru)
        code: Option<String>,
    },
}

#[derive(Subcommand)]
enum EngineCommand {
    /// List registered engines
    List,
    /// Search for engines and update the registry
    Scan {
        /// Ignore the saved registry and search the default locations again
        #[arg(long)]
        force: bool,
        /// Directories to scan instead of the default locations
        #[arg(value_name = "ROOT")]
        roots: Vec<PathBuf>,
    },
    /// Register an engine by its root directory
    Add {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Forget an engine version
    Remove {
        #[arg(value_name = "VERSION")]
        version: String,
    },
}

#[derive(Subcommand)]
enum PluginCommand {
    /// Print the contents of a .uplugin file
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Plugin descriptor to rebuild
    #[arg(long, value_name = "FILE")]
    plugin: PathBuf,

    /// Target engine version, e.g. 5.3
    #[arg(long, value_name = "VERSION")]
    engine: String,

    /// Target platform (repeatable). Defaults to the host platform.
    #[arg(long = "platform", value_name = "PLATFORM")]
    platforms: Vec<Platform>,

    /// Output directory. Defaults to <plugin folder>_<version> next to the plugin folder.
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Create a subfolder with the build date
    #[arg(long)]
    create_sub_folder: bool,
    /// Do not build for the host platform
    #[arg(long)]
    no_host_platform: bool,
    /// Include debug files in the package
    #[arg(long)]
    include_debug_files: bool,
    /// Compile with strict settings
    #[arg(long)]
    strict: bool,
    /// Do not embed the engine version in the descriptor
    #[arg(long)]
    unversioned: bool,

    /// Additional parameters, e.g. "-Param1=Value1 -Flag"
    #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
    extra: Option<String>,

    /// Print the command without running it
    #[arg(long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = cli
        .config_dir
        .clone()
        .map(AppPaths::with_dir)
        .unwrap_or_else(AppPaths::resolve);

    let log_dir = cli.log_file.then(|| paths.log_dir());
    let _guard = init_logging(cli.verbose, log_dir.as_deref());

    match cli.command {
        Commands::Engines(cmd) => run_engines(&paths, cmd),
        Commands::Plugin(PluginCommand::Info { file }) => plugin_info(&file),
        Commands::Build(args) => run_build(&paths, args),
        Commands::Language { code } => language(&paths, code),
    }
}

fn run_engines(paths: &AppPaths, cmd: EngineCommand) -> anyhow::Result<()> {
    let mut registry = EngineRegistry::load(&paths.engines_file());

    match cmd {
        EngineCommand::List => {
            registry.refresh(false);
            print_engines(&registry);
        }
        EngineCommand::Scan { force, roots } => {
            if roots.is_empty() {
                registry.refresh(force);
            } else {
                let added = registry.rescan(&roots);
                println!("{added} new engine(s) found");
                registry.persist()?;
            }
            print_engines(&registry);
        }
        EngineCommand::Add { path } => {
            let install = registry.add_manual(&path)?;
            registry.persist()?;
            println!(
                "Added Unreal Engine {} at {}",
                install.version,
                install.root_path.display()
            );
        }
        EngineCommand::Remove { version } => {
            match registry.remove(&version) {
                Some(install) => {
                    registry.persist()?;
                    println!("Removed Unreal Engine {}", install.version);
                }
                None => println!("No engine registered for version {version}"),
            }
        }
    }
    Ok(())
}

fn print_engines(registry: &EngineRegistry) {
    if registry.is_empty() {
        println!("No Unreal Engine installations registered. Use `uebuilder engines add <PATH>`.");
        return;
    }
    for install in registry.list() {
        let platforms: Vec<&str> = install
            .supported_platforms()
            .iter()
            .map(|p| p.as_str())
            .collect();
        println!(
            "{:<8} {:<14} {}  [{}]",
            install.version_label(),
            install.source.to_string(),
            install.root_path.display(),
            platforms.join(", ")
        );
    }
}

fn plugin_info(file: &Path) -> anyhow::Result<()> {
    let plugin = PluginDescriptor::load(file)?;
    println!("Name:      {}", plugin.friendly_name);
    if let Some(version) = &plugin.version_name {
        println!("Version:   {version}");
    }
    if let Some(category) = &plugin.category {
        println!("Category:  {category}");
    }
    if let Some(description) = &plugin.description {
        println!("About:     {description}");
    }
    if let Some(engine) = &plugin.declared_engine_version {
        println!("Engine:    {engine}");
    }
    if !plugin.modules.is_empty() {
        let names: Vec<&str> = plugin.modules.iter().map(|m| m.name.as_str()).collect();
        println!("Modules:   {}", names.join(", "));
    }
    if !plugin.supported_target_platforms.is_empty() {
        println!("Platforms: {}", plugin.supported_target_platforms.join(", "));
    }
    Ok(())
}

fn run_build(paths: &AppPaths, args: BuildArgs) -> anyhow::Result<()> {
    let mut registry = EngineRegistry::load(&paths.engines_file());
    registry.refresh(false);

    let Some(engine) = registry.get_label(&args.engine).cloned() else {
        let known: Vec<String> = registry.list().iter().map(|e| e.version_label()).collect();
        bail!(
            "Unreal Engine {} is not registered (known: {})",
            args.engine,
            if known.is_empty() { "none".to_string() } else { known.join(", ") }
        );
    };

    let plugin = PluginDescriptor::load(&args.plugin)?;
    if plugin.targets_same_engine(engine.version) {
        eprintln!(
            "{}",
            Color::Yellow.paint("Warning: target version matches the plugin's declared engine version")
        );
    }

    let mut extra = ExtraOptions::new();
    for (enabled, flag) in [
        (args.create_sub_folder, flags::CREATE_SUB_FOLDER),
        (args.no_host_platform, flags::NO_HOST_PLATFORM),
        (args.include_debug_files, flags::INCLUDE_DEBUG_FILES),
        (args.strict, flags::STRICT),
        (args.unversioned, flags::UNVERSIONED),
    ] {
        if enabled {
            extra.set_flag(flag, true);
        }
    }
    if let Some(raw) = &args.extra {
        extra.extend(ExtraOptions::parse(raw)?);
    }

    let platforms = if args.platforms.is_empty() {
        vec![Platform::host()]
    } else {
        args.platforms
    };

    let mut request = BuildRequest::new(plugin, engine, platforms).with_extra_options(extra);
    if let Some(output) = args.output {
        request = request.with_output_directory(output);
    }

    let command = build_command(&request);
    if args.dry_run {
        println!("{}", command.display());
        return Ok(());
    }

    request.validate()?;
    prepare_output_directory(&request)?;
    println!("Build command: {}", command.display());

    let colored = std::io::stdout().is_terminal();
    let run = execute(
        &command,
        move |line: OutputLine| print_line(&line, colored),
        |_| {},
    )
    .context("could not start RunUAT")?;

    let summary = run.wait();
    let elapsed = summary
        .elapsed()
        .map(|d| format!(" in {:.1}s", d.num_milliseconds() as f64 / 1000.0))
        .unwrap_or_default();

    match summary.state {
        RunState::Succeeded => println!(
            "{}",
            Color::Green.paint(format!(
                "Plugin built{elapsed}: {}",
                request.output_directory.display()
            ))
        ),
        RunState::Cancelled => println!("{}", Color::Yellow.paint("Plugin build cancelled")),
        _ => {}
    }
    summary.into_result()?;
    Ok(())
}

fn print_line(line: &OutputLine, colored: bool) {
    if !colored {
        println!("{}", line.text);
        return;
    }
    let painted = match line.severity {
        Severity::Error => Color::Red.paint(&line.text),
        Severity::Warning => Color::Yellow.paint(&line.text),
        Severity::Success => Color::Green.paint(&line.text),
        Severity::Info => Color::Default.paint(&line.text),
    };
    println!("{painted}");
}

fn language(paths: &AppPaths, code: Option<String>) -> anyhow::Result<()> {
    let path = paths.settings_file();
    let mut settings = Settings::load(&path);

    match code {
        None => println!("{}", settings.current_language),
        Some(code) => {
            if !settings.set_language(&code) {
                bail!("Unsupported language: {code} (available: en, ru)");
            }
            settings.persist(&path)?;
            println!("Language set to {}", settings.current_language);
        }
    }
    Ok(())
}
