use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use url::Url;

use crate::transform::{CropRect, Rotation};

const DEFAULT_IDENTIFIER: &str = "cam1";
const DEFAULT_URL: &str = "http://127.0.0.1:8080/camera";
const DEFAULT_PROFILE: &str = "standard";

#[derive(Debug, Deserialize, Default)]
struct PodConfigFile {
    identifier: Option<String>,
    url: Option<String>,
    profile: Option<String>,
    custom_profile: Option<SensorProfile>,
}

/// Resolved pod configuration: who we are, where frames go, and how the
/// sensor is read.
#[derive(Debug, Clone)]
pub struct PodConfig {
    pub identifier: String,
    pub base_url: String,
    pub profile: SensorProfile,
}

/// A fully resolved sensor profile: capture geometry, the region of
/// interest, mount rotation, output geometry, and frame rate.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorProfile {
    pub sensor_mode: u32,
    pub frame_rate: u32,
    pub capture_width: u32,
    pub capture_height: u32,
    #[serde(default)]
    pub crop: Option<CropRect>,
    #[serde(default)]
    pub rotation: Rotation,
    pub output_width: u32,
    pub output_height: u32,
}

impl SensorProfile {
    /// Built-in profiles for the supported sensor generations.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "standard" => Some(Self {
                sensor_mode: 7,
                frame_rate: 90,
                capture_width: 320,
                capture_height: 480,
                crop: None,
                rotation: Rotation::None,
                output_width: 320,
                output_height: 480,
            }),
            "wide" => Some(Self {
                sensor_mode: 6,
                frame_rate: 90,
                capture_width: 1280,
                capture_height: 660,
                crop: Some(CropRect {
                    left: 130,
                    top: 0,
                    width: 1020,
                    height: 660,
                }),
                rotation: Rotation::Cw90,
                output_width: 320,
                output_height: 480,
            }),
            _ => None,
        }
    }

    /// Raw grayscale frame size for this profile, in bytes.
    pub fn frame_len(&self) -> usize {
        (self.capture_width * self.capture_height) as usize
    }

    fn validate(&self) -> Result<()> {
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(anyhow!("capture dimensions must be non-zero"));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return Err(anyhow!("output dimensions must be non-zero"));
        }
        if self.frame_rate == 0 {
            return Err(anyhow!("frame rate must be non-zero"));
        }
        if let Some(crop) = &self.crop {
            if crop.width == 0 || crop.height == 0 {
                return Err(anyhow!("crop rectangle must be non-empty"));
            }
            if crop.left + crop.width > self.capture_width
                || crop.top + crop.height > self.capture_height
            {
                return Err(anyhow!(
                    "crop {}x{}+{}+{} exceeds capture frame {}x{}",
                    crop.width,
                    crop.height,
                    crop.left,
                    crop.top,
                    self.capture_width,
                    self.capture_height
                ));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn test_profile(width: u32, height: u32) -> Self {
        Self {
            sensor_mode: 0,
            frame_rate: 30,
            capture_width: width,
            capture_height: height,
            crop: None,
            rotation: Rotation::None,
            output_width: width,
            output_height: height,
        }
    }
}

impl PodConfig {
    /// Load configuration: file named by `FRAMEPOD_CONFIG` (if set), then
    /// env-var overrides, then validation. CLI overrides are applied on
    /// top by the daemon.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRAMEPOD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PodConfigFile) -> Result<Self> {
        let identifier = file
            .identifier
            .unwrap_or_else(|| DEFAULT_IDENTIFIER.to_string());
        let base_url = file.url.unwrap_or_else(|| DEFAULT_URL.to_string());
        let profile = match file.custom_profile {
            Some(profile) => profile,
            None => {
                let name = file.profile.as_deref().unwrap_or(DEFAULT_PROFILE);
                SensorProfile::builtin(name)
                    .ok_or_else(|| anyhow!("unknown sensor profile '{}'", name))?
            }
        };
        Ok(Self {
            identifier,
            base_url,
            profile,
        })
    }

    fn apply_env(&mut self) {
        if let Ok(identifier) = std::env::var("FRAMEPOD_IDENTIFIER") {
            if !identifier.trim().is_empty() {
                self.identifier = identifier;
            }
        }
        if let Ok(url) = std::env::var("FRAMEPOD_URL") {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(name) = std::env::var("FRAMEPOD_PROFILE") {
            if !name.trim().is_empty() {
                if let Some(profile) = SensorProfile::builtin(&name) {
                    self.profile = profile;
                } else {
                    log::warn!("FRAMEPOD_PROFILE names unknown profile '{}', ignored", name);
                }
            }
        }
    }

    /// Apply command-line overrides on top of file and environment.
    pub fn apply_overrides(
        &mut self,
        identifier: Option<String>,
        url: Option<String>,
        profile: Option<String>,
    ) -> Result<()> {
        if let Some(identifier) = identifier {
            self.identifier = identifier;
        }
        if let Some(url) = url {
            self.base_url = url;
        }
        if let Some(name) = profile {
            self.profile = SensorProfile::builtin(&name)
                .ok_or_else(|| anyhow!("unknown sensor profile '{}'", name))?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            return Err(anyhow!("camera identifier must not be empty"));
        }
        Url::parse(&self.base_url)
            .map_err(|e| anyhow!("invalid base url '{}': {}", self.base_url, e))?;
        self.profile.validate()
    }
}

fn read_config_file(path: &Path) -> Result<PodConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profiles_validate() {
        for name in ["standard", "wide"] {
            let profile = SensorProfile::builtin(name).unwrap();
            profile.validate().unwrap();
        }
        assert!(SensorProfile::builtin("nope").is_none());
    }

    #[test]
    fn wide_profile_carries_crop_and_rotation() {
        let profile = SensorProfile::builtin("wide").unwrap();
        assert_eq!(profile.rotation, Rotation::Cw90);
        let crop = profile.crop.unwrap();
        assert_eq!((crop.left, crop.top), (130, 0));
        assert_eq!((crop.width, crop.height), (1020, 660));
        assert_eq!(profile.frame_len(), 1280 * 660);
    }

    #[test]
    fn invalid_crop_is_rejected() {
        let mut profile = SensorProfile::builtin("standard").unwrap();
        profile.crop = Some(CropRect {
            left: 300,
            top: 0,
            width: 100,
            height: 100,
        });
        assert!(profile.validate().is_err());
    }
}
