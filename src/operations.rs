//! Build request handling: validation, output directory derivation and the
//! `RunUAT BuildPlugin` command line.
//!
//! [`build_command`] is pure and can be called on its own to preview a command.
//! [`prepare_output_directory`] is the only function here that touches the disk.

use crate::engine::{EngineInstallation, Platform};
use crate::error::{Error, Result};
use crate::plugin::PluginDescriptor;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Subcommand selecting plugin-build mode.
pub const BUILD_PLUGIN: &str = "BuildPlugin";

/// Pass-through flags understood by `BuildPlugin`.
pub mod flags {
    pub const CREATE_SUB_FOLDER: &str = "CreateSubFolder";
    pub const NO_HOST_PLATFORM: &str = "NoHostPlatform";
    pub const INCLUDE_DEBUG_FILES: &str = "IncludeDebugFiles";
    pub const STRICT: &str = "Strict";
    pub const UNVERSIONED: &str = "Unversioned";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Flag(bool),
    Value(String),
}

/// Extra `-Name` / `-Name=Value` arguments, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraOptions(IndexMap<String, OptionValue>);

impl ExtraOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_flag(&mut self, name: impl Into<String>, enabled: bool) -> &mut Self {
        self.0.insert(name.into(), OptionValue::Flag(enabled));
        self
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(name.into(), OptionValue::Value(value.into()));
        self
    }

    /// Parses a free-form parameter string such as `-Param1=Value1 -Flag`.
    /// Values may be shell-quoted. Tokens without a leading `-` are rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = shlex::split(input).ok_or_else(|| {
            Error::InvalidBuildRequest(format!("unbalanced quotes in parameters: {input}"))
        })?;

        let mut options = Self::new();
        for token in tokens {
            let Some(param) = token.strip_prefix('-') else {
                return Err(Error::InvalidBuildRequest(format!(
                    "parameter must start with '-': {token}"
                )));
            };
            match param.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    options.set_value(key, value);
                }
                None if !param.is_empty() => {
                    options.set_flag(param, true);
                }
                _ => {
                    return Err(Error::InvalidBuildRequest(format!(
                        "malformed parameter: {token}"
                    )))
                }
            }
        }
        Ok(options)
    }

    /// Appends `other`; keys already present are overwritten in place.
    pub fn extend(&mut self, other: ExtraOptions) {
        self.0.extend(other.0);
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Command-line form. Disabled flags and empty values are dropped.
    pub fn to_args(&self) -> Vec<String> {
        self.0
            .iter()
            .filter_map(|(name, value)| match value {
                OptionValue::Flag(true) => Some(format!("-{name}")),
                OptionValue::Flag(false) => None,
                OptionValue::Value(v) if v.is_empty() => None,
                OptionValue::Value(v) => Some(format!("-{name}={v}")),
            })
            .collect()
    }
}

/// What the user asked to build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub plugin: PluginDescriptor,
    pub target_engine: EngineInstallation,
    pub platforms: BTreeSet<Platform>,
    pub output_directory: PathBuf,
    pub extra_options: ExtraOptions,
}

impl BuildRequest {
    /// A request with the default output directory and no extra options.
    pub fn new(
        plugin: PluginDescriptor,
        target_engine: EngineInstallation,
        platforms: impl IntoIterator<Item = Platform>,
    ) -> Self {
        let output_directory = default_output_directory(&plugin.file_path, &target_engine);
        Self {
            plugin,
            target_engine,
            platforms: platforms.into_iter().collect(),
            output_directory,
            extra_options: ExtraOptions::new(),
        }
    }

    pub fn with_output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = dir.into();
        self
    }

    pub fn with_extra_options(mut self, options: ExtraOptions) -> Self {
        self.extra_options = options;
        self
    }

    /// Checks the request against the filesystem and the target engine.
    pub fn validate(&self) -> Result<()> {
        if self.platforms.is_empty() {
            return Err(Error::InvalidBuildRequest(
                "at least one target platform is required".into(),
            ));
        }

        let unsupported: Vec<&str> = self
            .platforms
            .iter()
            .filter(|p| !self.target_engine.supports(**p))
            .map(|p| p.as_str())
            .collect();
        if !unsupported.is_empty() {
            return Err(Error::InvalidBuildRequest(format!(
                "engine {} at {:?} does not support: {}",
                self.target_engine.version,
                self.target_engine.root_path,
                unsupported.join(", ")
            )));
        }

        if !self.plugin.file_path.is_file() {
            return Err(Error::descriptor(&self.plugin.file_path, "file not found"));
        }

        let uat = self.target_engine.uat_script();
        if !uat.is_file() {
            return Err(Error::InvalidBuildRequest(format!(
                "RunUAT not found at path: {}",
                uat.display()
            )));
        }

        if let Some(plugin_dir) = self.plugin.plugin_dir() {
            if self.output_directory.starts_with(plugin_dir) {
                return Err(Error::InvalidBuildRequest(format!(
                    "output directory {:?} must not be inside the plugin directory",
                    self.output_directory
                )));
            }
        }

        check_parent_writable(&self.output_directory)
    }
}

fn check_parent_writable(output: &Path) -> Result<()> {
    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let metadata = fs::metadata(parent).map_err(|e| {
        Error::InvalidBuildRequest(format!("output parent {:?} is not accessible: {}", parent, e))
    })?;
    if !metadata.is_dir() {
        return Err(Error::InvalidBuildRequest(format!(
            "output parent {:?} is not a directory",
            parent
        )));
    }
    // Mode bits say nothing about ownership or ACLs; try an actual write.
    if let Err(e) = tempfile::tempfile_in(parent) {
        return Err(Error::InvalidBuildRequest(format!(
            "no permission to create directory in: {:?} ({})",
            parent, e
        )));
    }
    Ok(())
}

/// `<plugin dir parent>/<plugin folder name up to the first '_'>_<version>`.
///
/// `/Plugins/Foo/Foo.uplugin` built for 5.3 lands in `/Plugins/Foo_5.3`. If that
/// would be the plugin's own folder, `_build` is appended.
pub fn default_output_directory(plugin_file: &Path, engine: &EngineInstallation) -> PathBuf {
    let plugin_dir = plugin_file.parent().unwrap_or(Path::new(""));
    let parent = plugin_dir.parent().unwrap_or(plugin_dir);

    let folder_name = plugin_dir
        .file_name()
        .or_else(|| plugin_file.file_stem())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let base = folder_name.split('_').next().unwrap_or(&folder_name);

    let output = parent.join(format!("{}_{}", base, engine.version));
    if output == plugin_dir {
        parent.join(format!("{}_{}_build", base, engine.version))
    } else {
        output
    }
}

/// A fully assembled invocation of the build tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl BuildCommand {
    /// Program followed by its arguments.
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    pub fn display(&self) -> String {
        display_command(&self.command_line())
    }
}

/// Assembles the `RunUAT BuildPlugin` invocation for `request`.
///
/// Argument order is fixed: entry point, subcommand, `-Plugin=`, `-Package=`,
/// one flag per platform in [`Platform`] declaration order, then extra options
/// in insertion order.
pub fn build_command(request: &BuildRequest) -> BuildCommand {
    let mut args = vec![
        BUILD_PLUGIN.to_string(),
        format!("-Plugin={}", request.plugin.file_path.display()),
        format!("-Package={}", request.output_directory.display()),
    ];
    args.extend(request.platforms.iter().map(|p| format!("-{}", p.as_str())));
    args.extend(request.extra_options.to_args());

    BuildCommand {
        program: request.target_engine.uat_script(),
        args,
        working_dir: request.target_engine.root_path.clone(),
    }
}

/// Single-line rendering of a command. Arguments containing whitespace or
/// quotes are shell-quoted; for `-Key=value` only the value is.
pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if !needs_quoting(arg) {
                return arg.clone();
            }
            match arg.split_once('=') {
                Some((key, value)) if key.starts_with('-') && !needs_quoting(key) => {
                    format!("{key}={}", quote(value))
                }
                _ => quote(arg),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn needs_quoting(arg: &str) -> bool {
    arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'')
}

fn quote(arg: &str) -> String {
    shlex::try_quote(arg)
        .map(|quoted| quoted.into_owned())
        .unwrap_or_else(|_| format!("{arg:?}"))
}

/// Creates the output directory ahead of the build.
pub fn prepare_output_directory(request: &BuildRequest) -> Result<()> {
    fs::create_dir_all(&request.output_directory).map_err(|e| {
        Error::InvalidBuildRequest(format!(
            "failed to create output directory {:?}: {}",
            request.output_directory, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineSource, EngineVersion};

    fn engine(root: &str, major: u32, minor: u32) -> EngineInstallation {
        EngineInstallation {
            root_path: PathBuf::from(root),
            version: EngineVersion::new(major, minor),
            source: EngineSource::AutoDetected,
        }
    }

    fn plugin(path: &str) -> PluginDescriptor {
        PluginDescriptor::parse(Path::new(path), r#"{"FriendlyName": "Foo"}"#).unwrap()
    }

    #[test]
    fn test_default_output_directory() {
        let e = engine("/Engines/5.3", 5, 3);
        assert_eq!(
            default_output_directory(Path::new("/Plugins/Foo/Foo.uplugin"), &e),
            PathBuf::from("/Plugins/Foo_5.3")
        );
        assert_eq!(
            default_output_directory(Path::new("/Plugins/Foo_5.1/Foo.uplugin"), &e),
            PathBuf::from("/Plugins/Foo_5.3")
        );
        assert_eq!(
            default_output_directory(Path::new("/Plugins/Foo_5.3/Foo.uplugin"), &e),
            PathBuf::from("/Plugins/Foo_5.3_build")
        );
    }

    #[test]
    fn test_build_command_order() {
        let request = BuildRequest::new(
            plugin("/Plugins/Foo/Foo.uplugin"),
            engine("/Engines/5.3", 5, 3),
            [Platform::Win64],
        );
        let cmd = build_command(&request);

        assert_eq!(cmd.program, uat("/Engines/5.3"));
        assert_eq!(cmd.working_dir, PathBuf::from("/Engines/5.3"));
        assert_eq!(
            cmd.args,
            vec![
                "BuildPlugin",
                "-Plugin=/Plugins/Foo/Foo.uplugin",
                "-Package=/Plugins/Foo_5.3",
                "-Win64",
            ]
        );
    }

    fn uat(root: &str) -> PathBuf {
        crate::engine::uat_script_path(Path::new(root))
    }

    #[test]
    fn test_build_command_is_deterministic_regardless_of_platform_order() {
        let a = BuildRequest::new(
            plugin("/P/Foo/Foo.uplugin"),
            engine("/E", 5, 3),
            [Platform::Linux, Platform::Win64, Platform::Mac],
        );
        let b = BuildRequest::new(
            plugin("/P/Foo/Foo.uplugin"),
            engine("/E", 5, 3),
            [Platform::Mac, Platform::Linux, Platform::Win64],
        );

        let cmd_a = build_command(&a);
        assert_eq!(cmd_a, build_command(&b));
        assert_eq!(cmd_a, build_command(&a));
        assert_eq!(&cmd_a.args[3..], ["-Win64", "-Mac", "-Linux"]);
    }

    #[test]
    fn test_extra_options_append_in_insertion_order() {
        let mut extra = ExtraOptions::new();
        extra
            .set_flag(flags::STRICT, true)
            .set_flag(flags::UNVERSIONED, false)
            .set_value("TargetPlatforms", "Win64+Linux")
            .set_value("Empty", "")
            .set_flag(flags::CREATE_SUB_FOLDER, true);

        let request = BuildRequest::new(
            plugin("/P/Foo/Foo.uplugin"),
            engine("/E", 5, 3),
            [Platform::Win64],
        )
        .with_output_directory("/Out")
        .with_extra_options(extra);
        let args = build_command(&request).args;

        assert_eq!(
            &args[2..],
            ["-Package=/Out", "-Win64", "-Strict", "-TargetPlatforms=Win64+Linux", "-CreateSubFolder"]
        );
    }

    #[test]
    fn test_extra_options_parse() {
        let options = ExtraOptions::parse(r#"-Param1=Value1 -Flag -Path="C:/My Dir""#).unwrap();
        assert_eq!(options.to_args(), vec!["-Param1=Value1", "-Flag", "-Path=C:/My Dir"]);

        assert!(ExtraOptions::parse("NoDash").is_err());
        assert!(ExtraOptions::parse("-=x").is_err());
        assert!(ExtraOptions::parse(r#"-A="unterminated"#).is_err());
        assert!(ExtraOptions::parse("   ").unwrap().is_empty());
    }

    #[test]
    fn test_display_command_quotes_spaces() {
        let argv = vec![
            "C:/Program Files/Epic Games/UE_5.3/Engine/Build/BatchFiles/RunUAT.bat".to_string(),
            "BuildPlugin".to_string(),
            "-Plugin=C:/My Plugins/Foo/Foo.uplugin".to_string(),
            "-Win64".to_string(),
        ];
        assert_eq!(
            display_command(&argv),
            "'C:/Program Files/Epic Games/UE_5.3/Engine/Build/BatchFiles/RunUAT.bat' BuildPlugin -Plugin='C:/My Plugins/Foo/Foo.uplugin' -Win64"
        );
    }

    #[test]
    fn test_display_command_escapes_embedded_quotes() {
        let argv = vec![
            "/Engines/5.3/RunUAT.sh".to_string(),
            r#"-Title=Say "hi""#.to_string(),
            "-Note=it's here".to_string(),
            r#"plain"quote"#.to_string(),
        ];
        let shown = display_command(&argv);
        assert!(shown.starts_with("/Engines/5.3/RunUAT.sh -Title="));
        assert_eq!(shlex::split(&shown).unwrap(), argv);
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_rejects_unwritable_output_parent() {
        use crate::engine::tests::fake_engine;
        use std::os::unix::fs::PermissionsExt;

        // Permission bits do not bind root
        if unsafe { libc::geteuid() } == 0 {
            return;
        }

        let temp = tempfile::tempdir().unwrap();
        let engine_root = temp.path().join("UE_5.3");
        fake_engine(&engine_root, Some((5, 3)), &[Platform::Linux]);
        let install = EngineInstallation::inspect(&engine_root, EngineSource::AutoDetected).unwrap();

        let plugin_dir = temp.path().join("Plugins/Foo");
        fs::create_dir_all(&plugin_dir).unwrap();
        let plugin_file = plugin_dir.join("Foo.uplugin");
        fs::write(&plugin_file, "{}").unwrap();
        let descriptor = PluginDescriptor::load(&plugin_file).unwrap();

        let locked = temp.path().join("Locked");
        fs::create_dir_all(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let request = BuildRequest::new(descriptor, install, [Platform::Linux])
            .with_output_directory(locked.join("Out"));
        let result = request.validate();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("no permission"));
    }

    #[test]
    fn test_validate() {
        use crate::engine::tests::fake_engine;

        let temp = tempfile::tempdir().unwrap();
        let engine_root = temp.path().join("UE_5.3");
        fake_engine(&engine_root, Some((5, 3)), &[Platform::Win64]);
        let install = EngineInstallation::inspect(&engine_root, EngineSource::AutoDetected).unwrap();

        let plugin_dir = temp.path().join("Plugins/Foo");
        fs::create_dir_all(&plugin_dir).unwrap();
        let plugin_file = plugin_dir.join("Foo.uplugin");
        fs::write(&plugin_file, "{}").unwrap();
        let descriptor = PluginDescriptor::load(&plugin_file).unwrap();

        let ok = BuildRequest::new(descriptor.clone(), install.clone(), [Platform::Win64]);
        ok.validate().unwrap();
        prepare_output_directory(&ok).unwrap();
        assert!(temp.path().join("Plugins/Foo_5.3").is_dir());

        let empty = BuildRequest::new(descriptor.clone(), install.clone(), Vec::<Platform>::new());
        assert!(matches!(empty.validate(), Err(Error::InvalidBuildRequest(_))));

        let unsupported = BuildRequest::new(descriptor.clone(), install.clone(), [Platform::Mac]);
        let err = unsupported.validate().unwrap_err();
        assert!(err.to_string().contains("Mac"));

        let nested = BuildRequest::new(descriptor.clone(), install.clone(), [Platform::Win64])
            .with_output_directory(plugin_dir.join("Out"));
        assert!(matches!(nested.validate(), Err(Error::InvalidBuildRequest(_))));

        let no_parent = BuildRequest::new(descriptor, install, [Platform::Win64])
            .with_output_directory(temp.path().join("missing/deeper/out"));
        assert!(matches!(no_parent.validate(), Err(Error::InvalidBuildRequest(_))));
    }
}
