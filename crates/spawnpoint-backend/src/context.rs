//! Build-context synthesis.
//!
//! A deterministic, side-effect-free function from a service configuration
//! to an image recipe plus tar build context. Entry order in the tar is
//! part of the contract: `entity.key`, `params.yml`, `dockerfile`, then the
//! entries of the decoded included-files archive, verbatim.

use std::io::Read;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

use spawnpoint_core::ServiceConfiguration;

/// Working directory inside every service container.
pub const WORKDIR: &str = "/srv/spawnpoint";
/// Credential file name, inside both the build context and the image.
pub const ENTITY_KEY_FILE: &str = "entity.key";
/// Parameter dump file name.
pub const PARAMS_FILE: &str = "params.yml";
/// Recipe file name inside the build context.
pub const DOCKERFILE_NAME: &str = "dockerfile";
/// Image tags are the service name under this prefix.
pub const IMAGE_TAG_PREFIX: &str = "spawnpoint_";

/// Errors raised while synthesizing a build context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to decode credential: {0}")]
    BadCredential(String),

    #[error("failed to read included files archive: {0}")]
    BadIncludedArchive(String),

    #[error("unknown source kind: {0}")]
    UnknownSourceKind(String),

    #[error("failed to serialize params: {0}")]
    BadParams(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The synthesized image recipe and tar payload.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub image_tag: String,
    pub recipe: String,
    pub tar_bytes: Vec<u8>,
}

/// Synthesize the build context for a configuration.
pub fn build_context(cfg: &ServiceConfiguration) -> Result<BuildContext, ContextError> {
    let recipe = generate_recipe(cfg)?;

    let credential = BASE64
        .decode(cfg.bw2_entity.as_bytes())
        .map_err(|e| ContextError::BadCredential(e.to_string()))?;
    let params =
        serde_yaml::to_string(&cfg.params).map_err(|e| ContextError::BadParams(e.to_string()))?;

    let mut builder = tar::Builder::new(Vec::new());
    append_file(&mut builder, ENTITY_KEY_FILE, &credential)?;
    append_file(&mut builder, PARAMS_FILE, params.as_bytes())?;
    append_file(&mut builder, DOCKERFILE_NAME, recipe.as_bytes())?;

    // The final included_files element is the base64 tar of the files'
    // contents; its entries are re-emitted into the build context verbatim.
    if let Some(encoded) = cfg.included_files.last() {
        let decoded = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| ContextError::BadIncludedArchive(e.to_string()))?;
        let mut archive = tar::Archive::new(decoded.as_slice());
        let entries = archive
            .entries()
            .map_err(|e| ContextError::BadIncludedArchive(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| ContextError::BadIncludedArchive(e.to_string()))?;
            let header = entry.header().clone();
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| ContextError::BadIncludedArchive(e.to_string()))?;
            builder.append(&header, data.as_slice())?;
        }
    }

    let tar_bytes = builder.into_inner()?;
    Ok(BuildContext {
        image_tag: format!("{IMAGE_TAG_PREFIX}{}", cfg.name),
        recipe,
        tar_bytes,
    })
}

/// Generate the image recipe text.
fn generate_recipe(cfg: &ServiceConfiguration) -> Result<String, ContextError> {
    let mut recipe = String::new();
    recipe.push_str(&format!("FROM {}\n", cfg.base_image_or_default()));

    if let Some(raw) = cfg.source.as_deref() {
        let (_, location) = cfg
            .source_parts()
            .ok_or_else(|| ContextError::UnknownSourceKind(raw.to_string()))?;
        recipe.push_str(&format!("RUN git clone {location} {WORKDIR}\n"));
    }

    recipe.push_str(&format!("WORKDIR {WORKDIR}\n"));
    recipe.push_str(&format!("COPY {ENTITY_KEY_FILE} {ENTITY_KEY_FILE}\n"));
    recipe.push_str(&format!("COPY {PARAMS_FILE} {PARAMS_FILE}\n"));

    // All included_files but the final archive-payload element are copied.
    if let [files @ .., _archive] = cfg.included_files.as_slice() {
        for file in files {
            recipe.push_str(&format!("COPY {file} {file}\n"));
        }
    }
    for dir in &cfg.included_directories {
        let base = Path::new(dir)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.clone());
        recipe.push_str(&format!("COPY {base} {base}\n"));
    }

    if !cfg.apt_requires.is_empty() {
        recipe.push_str(&format!(
            "RUN apt-get update && apt-get install -y {}\n",
            cfg.apt_requires
        ));
    }
    for cmd in &cfg.build {
        recipe.push_str(&format!("RUN {cmd}\n"));
    }

    Ok(recipe)
}

fn append_file(
    builder: &mut tar::Builder<Vec<u8>>,
    name: &str,
    data: &[u8],
) -> Result<(), ContextError> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}
