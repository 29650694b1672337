//! Device enumeration and selection.
//!
//! Selection rules: a single connected device is used as-is; a name argument
//! is matched case-insensitively as a substring; anything ambiguous falls
//! back to an interactive numeric prompt. Prompt I/O goes through the
//! [`Prompter`] seam so tests can script the interaction.

use crate::{CameraDescriptor, CameraError, CameraResult, StaticConfig, VideoCamera};
use std::io::{BufRead, Write};
use tracing::{info, warn};

/// Source of openable camera devices.
pub trait CameraProvider {
    /// Enumerate connected devices.
    fn devices(&self) -> Vec<CameraDescriptor>;

    /// Open a device and apply its static configuration.
    fn open(
        &self,
        descriptor: &CameraDescriptor,
        config: &StaticConfig,
    ) -> CameraResult<Box<dyn VideoCamera>>;
}

/// Interactive selection seam.
pub trait Prompter {
    /// Ask the user to pick one of `names`; `None` means input was exhausted.
    fn select_index(&mut self, names: &[String]) -> Option<usize>;
}

/// Prompter backed by stdin/stdout, re-prompting on invalid input.
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn select_index(&mut self, names: &[String]) -> Option<usize> {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            println!("\nSelect from the following cameras:");
            for (i, name) in names.iter().enumerate() {
                println!("\t{i}) {name}");
            }
            print!("\nEnter selection: ");
            let _ = std::io::stdout().flush();

            let line = lines.next()?.ok()?;
            if let Ok(index) = line.trim().parse::<usize>() {
                if index < names.len() {
                    return Some(index);
                }
            }
            println!("Invalid selection.");
        }
    }
}

/// Pick the device to open, optionally constrained by a name substring.
pub fn select_device(
    provider: &dyn CameraProvider,
    name: Option<&str>,
    prompter: &mut dyn Prompter,
) -> CameraResult<CameraDescriptor> {
    let devices = provider.devices();
    info!("Found {} cameras connected.", devices.len());
    if devices.is_empty() {
        return Err(CameraError::Device("no cameras connected".to_string()));
    }

    match name.filter(|n| !n.is_empty()) {
        None => {
            if devices.len() == 1 {
                info!(
                    "Connecting to the only camera available, named '{}'",
                    devices[0].name
                );
                Ok(devices[0].clone())
            } else {
                prompt_for_camera(&devices, prompter)
            }
        }
        Some(name) => {
            let needle = name.to_lowercase();
            let matches: Vec<&CameraDescriptor> = devices
                .iter()
                .filter(|d| d.name.to_lowercase().contains(&needle))
                .collect();

            match matches.len() {
                0 => Err(CameraError::Device(format!(
                    "no camera name matched '{name}'"
                ))),
                1 => {
                    info!("Found exactly one match with name '{}'", matches[0].name);
                    Ok(matches[0].clone())
                }
                _ => {
                    warn!("Multiple camera names contain '{name}'");
                    prompt_for_camera(&devices, prompter)
                }
            }
        }
    }
}

fn prompt_for_camera(
    devices: &[CameraDescriptor],
    prompter: &mut dyn Prompter,
) -> CameraResult<CameraDescriptor> {
    let names: Vec<String> = devices.iter().map(|d| d.name.clone()).collect();
    let index = prompter
        .select_index(&names)
        .ok_or_else(|| CameraError::Device("camera selection aborted".to_string()))?;
    info!("User selected camera {}, named '{}'", index, names[index]);
    Ok(devices[index].clone())
}
