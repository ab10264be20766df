//! End-to-end distribution builds against a scratch repository layout.
//!
//! Lays out `<tmp>/build_distrib/` (repo root with the template) next to
//! `<tmp>/source/<board>/` (firmware build output), runs the builder and
//! checks every archive by extracting it again.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tempfile::TempDir;
use tonex_distrib::artifact::archive::{extract_zip, list_entries};
use tonex_distrib::config::{DEFAULT_TARGETS, DEFAULT_TEMPLATE};
use tonex_distrib::preflight::check_inputs;
use tonex_distrib::{DistribConfig, DistributionBuilder};

fn write_template(repo: &Path, name: &str) {
    let dir = repo.join(name);
    fs::create_dir_all(dir.join("bin")).unwrap();
    fs::create_dir_all(dir.join("docs")).unwrap();
    fs::write(dir.join("readme.txt"), "Flash with the bundled tool.\n").unwrap();
    fs::write(dir.join("docs/wiring.txt"), "GPIO map\n").unwrap();
    fs::write(dir.join("flash.bat"), "esptool write_flash ...\r\n").unwrap();
}

fn write_board(source_root: &Path, folder: &str, include_ota: bool) {
    let dir = source_root.join(folder);
    fs::create_dir_all(dir.join("bootloader")).unwrap();
    fs::create_dir_all(dir.join("partition_table")).unwrap();
    fs::write(dir.join("bootloader/bootloader.bin"), format!("{folder}-boot")).unwrap();
    fs::write(
        dir.join("partition_table/partition-table.bin"),
        format!("{folder}-pt"),
    )
    .unwrap();
    fs::write(dir.join("TonexController.bin"), vec![folder.len() as u8; 8192]).unwrap();
    if include_ota {
        fs::write(dir.join("ota_data_initial.bin"), [0xFFu8; 32]).unwrap();
    }
}

/// Every regular file under `root`, keyed by `/`-separated relative path.
fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[test]
fn default_boards_build_and_round_trip() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("build_distrib");
    write_template(&repo, DEFAULT_TEMPLATE);
    for (folder, _) in DEFAULT_TARGETS {
        write_board(&temp.path().join("source"), folder, true);
    }

    let config = DistribConfig::with_defaults(&repo);
    check_inputs(&config).unwrap();
    let builder = DistributionBuilder::new(config).unwrap();
    let outcomes = builder.build_all().unwrap();
    assert_eq!(outcomes.len(), DEFAULT_TARGETS.len());

    // Staging holds the last board only; its archive must match it exactly.
    let last = outcomes.last().unwrap();
    let extracted = temp.path().join("extracted-last");
    extract_zip(&last.archive.path, &extracted).unwrap();
    assert_eq!(read_tree(builder.staging_dir()), read_tree(&extracted));

    for ((folder, label), outcome) in DEFAULT_TARGETS.iter().zip(&outcomes) {
        let expected = repo.join(format!("TonexOneController_V1.0.7.2_beta_4_{label}.zip"));
        assert_eq!(outcome.archive.path, expected);

        let dest = temp.path().join("extracted").join(label);
        extract_zip(&expected, &dest).unwrap();
        let tree = read_tree(&dest);

        let names: Vec<&str> = tree.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec![
                "bin/TonexController.bin",
                "bin/bootloader.bin",
                "bin/ota_data_initial.bin",
                "bin/partition-table.bin",
                "docs/wiring.txt",
                "flash.bat",
                "readme.txt",
            ]
        );
        assert_eq!(
            tree["bin/bootloader.bin"],
            format!("{folder}-boot").into_bytes()
        );
    }

    assert!(!repo.join("temp").join("TonexOneController_V1.0.7.2_beta_4_M5AtomS3R.zip").exists());
}

#[test]
fn toml_config_scenario_with_and_without_ota() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("build_distrib");
    fs::create_dir_all(repo.join("T")).unwrap();
    fs::write(repo.join("T/readme.txt"), "readme").unwrap();
    write_board(&temp.path().join("source"), "build_x", true);

    let config_path = repo.join("distrib.toml");
    fs::write(
        &config_path,
        r#"
version = "3.1.0"
output_dir = "dist"

[[targets]]
template = "T"
target_folder = "build_x"
board_label = "WithOta"

[[targets]]
template = "T"
target_folder = "build_x"
include_ota = false
board_label = "NoOta"
"#,
    )
    .unwrap();

    let config = DistribConfig::load(&repo, &config_path).unwrap();
    let builder = DistributionBuilder::new(config).unwrap();
    builder.build_all().unwrap();

    let mut with_ota = list_entries(&repo.join("dist/TonexOneController_V3.1.0_WithOta.zip"))
        .unwrap()
        .into_iter()
        .filter(|e| !e.ends_with('/'))
        .collect::<Vec<_>>();
    with_ota.sort();
    assert_eq!(
        with_ota,
        vec![
            "bin/TonexController.bin",
            "bin/bootloader.bin",
            "bin/ota_data_initial.bin",
            "bin/partition-table.bin",
            "readme.txt",
        ]
    );

    let no_ota = list_entries(&repo.join("dist/TonexOneController_V3.1.0_NoOta.zip")).unwrap();
    assert!(no_ota.iter().any(|e| e == "readme.txt"));
    assert!(!no_ota.iter().any(|e| e == "bin/ota_data_initial.bin"));
}

#[test]
fn missing_board_binary_stops_run_without_archive() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("build_distrib");
    write_template(&repo, DEFAULT_TEMPLATE);
    // Only the first board has binaries.
    write_board(&temp.path().join("source"), DEFAULT_TARGETS[0].0, true);

    let config = DistribConfig::with_defaults(&repo);
    assert!(check_inputs(&config).is_err());

    let builder = DistributionBuilder::new(config).unwrap();
    let err = builder.build_all().unwrap_err();
    assert!(format!("{err:#}").contains("required artifact not found"));

    let zips: Vec<_> = fs::read_dir(&repo)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".zip") || name.ends_with(".partial"))
        .collect();
    assert_eq!(
        zips,
        vec!["TonexOneController_V1.0.7.2_beta_4_Waveshare_1_69.zip".to_string()]
    );
}
