use std::fs;
use std::path::{Path, PathBuf};
use uebuilder_core::engine::uat_script_path;
use uebuilder_core::operations::prepare_output_directory;
use uebuilder_core::{
    build_command, BuildRequest, EngineInstallation, EngineRegistry, EngineSource, EngineVersion,
    Error, ExtraOptions, Platform, PluginDescriptor,
};

fn fake_engine(root: &Path, major: u32, minor: u32, platforms: &[Platform]) {
    let batch = root.join("Engine/Build/BatchFiles");
    fs::create_dir_all(&batch).unwrap();
    fs::write(batch.join("RunUAT.bat"), "@echo off\n").unwrap();
    fs::write(batch.join("RunUAT.sh"), "#!/bin/sh\n").unwrap();
    for p in platforms {
        fs::create_dir_all(root.join("Engine/Binaries").join(p.as_str())).unwrap();
    }
    fs::write(
        root.join("Engine/Build/Build.version"),
        format!(r#"{{"MajorVersion": {major}, "MinorVersion": {minor}, "PatchVersion": 0}}"#),
    )
    .unwrap();
}

fn write_plugin(dir: &Path, name: &str, engine_version: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{name}.uplugin"));
    fs::write(
        &path,
        format!(
            r#"{{
    "FileVersion": 3,
    "VersionName": "1.0",
    "FriendlyName": "{name}",
    "EngineVersion": "{engine_version}",
    "Modules": [{{"Name": "{name}", "Type": "Runtime", "LoadingPhase": "Default"}}]
}}"#
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_registry_scenario_builds_expected_command() {
    let mut registry = EngineRegistry::in_memory();
    for (root, minor) in [("/Engines/5.1", 1), ("/Engines/5.3", 3)] {
        registry.insert(EngineInstallation {
            root_path: PathBuf::from(root),
            version: EngineVersion::new(5, minor),
            source: EngineSource::AutoDetected,
        });
    }

    let engine = registry.get_label("5.3").unwrap().clone();
    let plugin = PluginDescriptor::parse(
        Path::new("/Plugins/Foo/Foo.uplugin"),
        r#"{"FriendlyName": "Foo", "EngineVersion": "5.1.0"}"#,
    )
    .unwrap();

    let request = BuildRequest::new(plugin, engine, [Platform::Win64]);
    let command = build_command(&request);

    assert_eq!(command.program, uat_script_path(Path::new("/Engines/5.3")));
    assert_eq!(command.working_dir, PathBuf::from("/Engines/5.3"));
    assert_eq!(
        command.args,
        vec![
            "BuildPlugin".to_string(),
            format!("-Plugin={}", Path::new("/Plugins/Foo/Foo.uplugin").display()),
            format!("-Package={}", Path::new("/Plugins").join("Foo_5.3").display()),
            "-Win64".to_string(),
        ]
    );
    assert_eq!(command, build_command(&request));
}

#[test]
fn test_registry_roundtrip_through_disk() {
    let temp = tempfile::tempdir().unwrap();
    let engines = temp.path().join("Epic Games");
    fake_engine(&engines.join("UE_5.1"), 5, 1, &[Platform::Win64]);
    fake_engine(&engines.join("UE_5.3"), 5, 3, &[Platform::Win64, Platform::Linux]);

    let config = temp.path().join("config/unreal_engines_config.json");
    let mut registry = EngineRegistry::load(&config);
    assert!(registry.is_empty());
    assert_eq!(registry.rescan(&[engines.clone()]), 2);
    registry.persist().unwrap();

    let reloaded = EngineRegistry::load(&config);
    let labels: Vec<String> = reloaded.list().iter().map(|e| e.version_label()).collect();
    assert_eq!(labels, ["5.1", "5.3"]);
    assert_eq!(
        reloaded.get_label("5.3").unwrap().supported_platforms(),
        vec![Platform::Win64, Platform::Linux]
    );
}

#[test]
fn test_add_manual_invalid_path_leaves_registry_unchanged() {
    let temp = tempfile::tempdir().unwrap();
    fake_engine(&temp.path().join("UE_5.2"), 5, 2, &[Platform::Win64]);

    let mut registry = EngineRegistry::in_memory();
    let added = registry.add_manual(&temp.path().join("UE_5.2")).unwrap();
    assert_eq!(added.version_label(), "5.2");
    assert_eq!(added.source, EngineSource::ManuallyAdded);

    let empty = temp.path().join("NotAnEngine");
    fs::create_dir_all(&empty).unwrap();
    let err = registry.add_manual(&empty).unwrap_err();
    assert!(matches!(err, Error::InvalidEngineInstallation { .. }));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_validated_request_prepares_output() {
    let temp = tempfile::tempdir().unwrap();
    let engine_root = temp.path().join("UE_5.3");
    fake_engine(&engine_root, 5, 3, &[Platform::Win64]);
    let engine = EngineInstallation::inspect(&engine_root, EngineSource::AutoDetected).unwrap();

    let plugin_file = write_plugin(&temp.path().join("Plugins/Foo"), "Foo", "5.1.0");
    let plugin = PluginDescriptor::load(&plugin_file).unwrap();
    assert_eq!(plugin.friendly_name, "Foo");
    assert!(!plugin.targets_same_engine(engine.version));

    let mut extras = ExtraOptions::parse("-NoHostPlatform -Architecture=arm64").unwrap();
    extras.set_flag("Strict", false);
    let request = BuildRequest::new(plugin, engine, [Platform::Win64]).with_extra_options(extras);
    request.validate().unwrap();

    let command = build_command(&request);
    assert_eq!(
        &command.args[command.args.len() - 3..],
        ["-Win64", "-NoHostPlatform", "-Architecture=arm64"]
    );

    prepare_output_directory(&request).unwrap();
    assert!(temp.path().join("Plugins/Foo_5.3").is_dir());
}

#[test]
fn test_request_for_unsupported_platform_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let engine_root = temp.path().join("UE_5.3");
    fake_engine(&engine_root, 5, 3, &[Platform::Win64]);
    let engine = EngineInstallation::inspect(&engine_root, EngineSource::AutoDetected).unwrap();
    let plugin_file = write_plugin(&temp.path().join("Plugins/Foo"), "Foo", "5.3.0");
    let plugin = PluginDescriptor::load(&plugin_file).unwrap();
    assert!(plugin.targets_same_engine(engine.version));

    let request = BuildRequest::new(plugin, engine, [Platform::Android]);
    let err = request.validate().unwrap_err();
    assert!(matches!(err, Error::InvalidBuildRequest(_)));
    assert!(err.to_string().contains("Android"));
}
