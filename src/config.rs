use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::Deserialize;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::actions::tool_available;
use crate::context::{Poll, TitleMatcher};
use crate::cooldown::ActionClass;
use crate::cursor::CursorSeed;
use crate::dispatch::DispatchConfig;
use crate::gestures::{ClickTrigger, FistPolicy};
use crate::input;
use crate::landmarks::Handedness;

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

/// Which hand a role listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandSelector {
    #[default]
    Any,
    Left,
    Right,
}

impl HandSelector {
    pub fn accepts(&self, hand: Handedness) -> bool {
        match self {
            Self::Any => true,
            Self::Left => hand == Handedness::Left,
            Self::Right => hand == Handedness::Right,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tracking {
    pub max_hands: usize,
    pub min_confidence: f32,
    pub mirror_x: bool,
    pub pointer_hand: HandSelector,
    pub gesture_hand: HandSelector,
    pub fps: u32,
}

impl Default for Tracking {
    fn default() -> Self {
        Self {
            max_hands: 1,
            min_confidence: 0.5,
            mirror_x: true,
            pointer_hand: HandSelector::Any,
            gesture_hand: HandSelector::Any,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Classifier {
    pub fist_policy: FistPolicy,
    pub confirm_frames: u32,
    pub click_trigger: ClickTrigger,
    /// Forward z travel between two frames that counts as a push.
    pub push_threshold: f32,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            fist_policy: FistPolicy::FingersOnly,
            confirm_frames: 3,
            click_trigger: ClickTrigger::Fist,
            push_threshold: 0.02,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cursor {
    pub alpha: f32,
    pub seed: CursorSeed,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            seed: CursorSeed::Origin,
            screen_width: 1920,
            screen_height: 1080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cooldowns {
    pub gesture_ms: u64,
    pub click_ms: u64,
    pub media_skip_ms: u64,
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self {
            gesture_ms: 1000,
            click_ms: 500,
            media_skip_ms: 2000,
        }
    }
}

/// Case-insensitive title substrings for each foreground context.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Contexts {
    pub media_player: Vec<String>,
    pub text_editor: Vec<String>,
    pub save_dialog: Vec<String>,
    pub target_app: Vec<String>,
}

impl Default for Contexts {
    fn default() -> Self {
        let v = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        Self {
            media_player: v(&["youtube"]),
            text_editor: v(&["notepad"]),
            save_dialog: v(&["save as"]),
            target_app: v(&["youtube"]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Workflow {
    pub save_directory: String,
    pub default_filename: String,
    pub filename_max_len: usize,
    pub extension: String,
    pub dialog_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub media_skip_key: String,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            save_directory: "~/Documents".into(),
            default_filename: "untitled".into(),
            filename_max_len: 50,
            extension: "txt".into(),
            dialog_timeout_ms: 3000,
            poll_interval_ms: 50,
            media_skip_key: "L".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    #[serde(default)]
    pub tracking: Tracking,
    #[serde(default)]
    pub classifier: Classifier,
    #[serde(default)]
    pub cursor: Cursor,
    #[serde(default)]
    pub cooldowns: Cooldowns,
    #[serde(default)]
    pub contexts: Contexts,
    #[serde(default)]
    pub workflow: Workflow,
}

impl Profile {
    pub fn screen(&self) -> (u32, u32) {
        (self.cursor.screen_width, self.cursor.screen_height)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        let c = &self.contexts;
        let w = &self.workflow;
        DispatchConfig {
            media_player: TitleMatcher::new(&c.media_player),
            text_editor: TitleMatcher::new(&c.text_editor),
            save_dialog: TitleMatcher::new(&c.save_dialog),
            target_app: TitleMatcher::new(&c.target_app),
            media_skip_key: w.media_skip_key.clone(),
            save_directory: expand_home(&w.save_directory),
            default_filename: w.default_filename.clone(),
            filename_max_len: w.filename_max_len,
            extension: w.extension.clone(),
            poll: Poll {
                timeout: Duration::from_millis(w.dialog_timeout_ms),
                interval: Duration::from_millis(w.poll_interval_ms),
            },
            cooldowns: vec![
                (ActionClass::Gesture, Duration::from_millis(self.cooldowns.gesture_ms)),
                (ActionClass::Click, Duration::from_millis(self.cooldowns.click_ms)),
                (ActionClass::MediaSkip, Duration::from_millis(self.cooldowns.media_skip_ms)),
            ],
        }
    }

    pub fn parse(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }
}

fn expand_home(path: &str) -> String {
    let Some(rest) = path.strip_prefix('~') else {
        return path.to_string();
    };
    match UserDirs::new() {
        Some(dirs) => format!("{}{rest}", dirs.home_dir().display()),
        None => path.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
    pub detected_cameras: Vec<String>,
}

fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot resolve home directory"))?;
    Ok(dirs.home_dir().join(".config").join("handctl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_from(config_dir()?)
    }

    fn load_from(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
            detected_cameras: input::discover_cameras()
                .into_iter()
                .map(|c| c.to_string())
                .collect(),
        })
    }

    /// Re-read the active profile. On error the last good profile stays.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        self.profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        Ok(())
    }

    pub fn active_path(&self) -> PathBuf {
        self.profiles_dir.join(format!("{}.toml", self.active_name))
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        serde_json::json!({
            "uinput_present": Path::new("/dev/uinput").exists(),
            "input_group_member": check_in_input_group(),
            "xdotool_present": tool_available("xdotool"),
            "xclip_present": tool_available("xclip"),
            "cameras": input::discover_cameras().iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
            }
        })
    }
}

fn load_profile(profiles_dir: &Path, name: &str) -> Result<Profile> {
    let path = profiles_dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Profile::parse(&txt).with_context(|| format!("failed to parse {}", path.display()))
}

fn validate_profile(p: &Profile) -> Result<()> {
    let t = &p.tracking;
    if t.max_hands == 0 {
        return Err(anyhow!("tracking.max_hands must be at least 1"));
    }
    if !(0.0..=1.0).contains(&t.min_confidence) {
        return Err(anyhow!("tracking.min_confidence must be in [0,1]"));
    }
    if t.fps == 0 {
        return Err(anyhow!("tracking.fps must be positive"));
    }
    if p.classifier.confirm_frames == 0 {
        return Err(anyhow!("classifier.confirm_frames must be at least 1"));
    }
    if !(p.classifier.push_threshold > 0.0) {
        return Err(anyhow!("classifier.push_threshold must be positive"));
    }
    if !(p.cursor.alpha > 0.0 && p.cursor.alpha <= 1.0) {
        return Err(anyhow!("cursor.alpha must be in (0,1]"));
    }
    if p.cursor.screen_width == 0 || p.cursor.screen_height == 0 {
        return Err(anyhow!("cursor.screen_width/screen_height must be positive"));
    }

    let c = &p.contexts;
    for (name, list) in [
        ("media_player", &c.media_player),
        ("text_editor", &c.text_editor),
        ("save_dialog", &c.save_dialog),
        ("target_app", &c.target_app),
    ] {
        if list.iter().all(|s| s.trim().is_empty()) {
            return Err(anyhow!("contexts.{name} needs at least one title pattern"));
        }
    }

    let w = &p.workflow;
    if w.filename_max_len == 0 {
        return Err(anyhow!("workflow.filename_max_len must be positive"));
    }
    if w.default_filename.trim().is_empty() {
        return Err(anyhow!("workflow.default_filename must not be empty"));
    }
    if w.poll_interval_ms == 0 || w.dialog_timeout_ms < w.poll_interval_ms {
        return Err(anyhow!(
            "workflow.poll_interval_ms must be positive and not exceed dialog_timeout_ms"
        ));
    }
    if w.media_skip_key.trim().is_empty() {
        return Err(anyhow!("workflow.media_skip_key must not be empty"));
    }
    Ok(())
}

fn check_in_input_group() -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        for line in s.lines() {
            if line.starts_with("input:") {
                if line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
                {
                    return true;
                }
            }
        }
    }
    false
}
