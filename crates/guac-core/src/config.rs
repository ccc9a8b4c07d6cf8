//! Connection configuration.
//!
//! A connection is described by an optional connection id (to join an
//! existing session), a protocol name (`rdp`, `vnc`, `ssh`, `telnet`,
//! `kubernetes`), and a flat map of parameters. The engine passes parameters
//! through to guacd verbatim; their semantics belong to the daemon.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Recognised parameter names, as guacd documents them.
///
/// The list is not exhaustive — unknown keys pass through untouched — but
/// these are the ones embedders commonly set.
pub mod keys {
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const DOMAIN: &str = "domain";

    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const DPI: &str = "dpi";
    pub const COLOR_DEPTH: &str = "color-depth";
    pub const RESIZE_METHOD: &str = "resize-method";
    pub const CURSOR: &str = "cursor";
    pub const SWAP_RED_BLUE: &str = "swap-red-blue";
    pub const READ_ONLY: &str = "read-only";
    pub const TIMEZONE: &str = "timezone";

    pub const DISABLE_AUDIO: &str = "disable-audio";
    pub const ENABLE_AUDIO_INPUT: &str = "enable-audio-input";

    pub const ENABLE_RECORDING: &str = "enable-recording";
    pub const RECORDING_PATH: &str = "recording-path";
    pub const CREATE_RECORDING_PATH: &str = "create-recording-path";

    pub const ENABLE_DRIVE: &str = "enable-drive";
    pub const DRIVE_NAME: &str = "drive-name";
    pub const DRIVE_PATH: &str = "drive-path";
    pub const CREATE_DRIVE_PATH: &str = "create-drive-path";

    pub const SECURITY: &str = "security";
    pub const IGNORE_CERT: &str = "ignore-cert";
    pub const PRECONNECTION_ID: &str = "preconnection-id";
    pub const PRECONNECTION_BLOB: &str = "preconnection-blob";
    pub const DEST_HOST: &str = "dest-host";
    pub const DEST_PORT: &str = "dest-port";

    pub const REMOTE_APP: &str = "remote-app";
    pub const REMOTE_APP_DIR: &str = "remote-app-dir";
    pub const REMOTE_APP_ARGS: &str = "remote-app-args";

    pub const ENABLE_WALLPAPER: &str = "enable-wallpaper";
    pub const ENABLE_THEMING: &str = "enable-theming";
    pub const ENABLE_FONT_SMOOTHING: &str = "enable-font-smoothing";
    pub const ENABLE_FULL_WINDOW_DRAG: &str = "enable-full-window-drag";
    pub const ENABLE_DESKTOP_COMPOSITION: &str = "enable-desktop-composition";
    pub const ENABLE_MENU_ANIMATIONS: &str = "enable-menu-animations";
    pub const ENABLE_PRINTING: &str = "enable-printing";
    pub const PRINTER_NAME: &str = "printer-name";
    pub const PRINTER_DRIVER: &str = "printer-driver";
    pub const DISABLE_BITMAP_CACHING: &str = "disable-bitmap-caching";
    pub const DISABLE_OFFSCREEN_CACHING: &str = "disable-offscreen-caching";
    pub const FORCE_LOSSLESS: &str = "force-lossless";

    pub const FONT_NAME: &str = "font-name";
    pub const FONT_SIZE: &str = "font-size";
    pub const COLOR_SCHEME: &str = "color-scheme";
    pub const BACKSPACE: &str = "backspace";
    pub const TERMINAL_TYPE: &str = "terminal-type";
    pub const USERNAME_REGEX: &str = "username-regex";
    pub const PASSWORD_REGEX: &str = "password-regex";
    pub const LOGIN_SUCCESS_REGEX: &str = "login-success-regex";
    pub const LOGIN_FAILURE_REGEX: &str = "login-failure-regex";

    pub const NAMESPACE: &str = "namespace";
    pub const POD: &str = "pod";
    pub const CONTAINER: &str = "container";
    pub const USE_SSL: &str = "use-ssl";
    pub const CLIENT_CERT: &str = "client-cert";
    pub const CLIENT_KEY: &str = "client-key";
    pub const CA_CERT: &str = "ca-cert";
}

/// Parameters for one guacd connection.
///
/// Serde derives let embedders load a parameter map straight from JSON
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Connection id of an existing session to join; empty for a new
    /// connection.
    #[serde(default)]
    pub connection_id: String,

    /// Protocol to select when opening a new connection.
    #[serde(default)]
    pub protocol: String,

    /// Flat parameter map, passed through to guacd verbatim.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing any previous value.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(name.into(), value.into());
    }

    /// Removes a parameter.
    pub fn unset_parameter(&mut self, name: &str) {
        self.parameters.remove(name);
    }

    /// Returns a parameter value, or the empty string when unset.
    ///
    /// The handshake sends an empty value for every requested argument that
    /// the embedder did not configure, so absence and emptiness are
    /// deliberately indistinguishable here.
    pub fn parameter(&self, name: &str) -> String {
        self.parameters.get(name).cloned().unwrap_or_default()
    }

    /// Marks the connection read-only (used for observer tunnels).
    pub fn set_read_only(&mut self) {
        self.set_parameter(keys::READ_ONLY, "true");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
