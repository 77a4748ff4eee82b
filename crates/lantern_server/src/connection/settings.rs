use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_SCREEN_WIDTH: u32 = 80;
pub const DEFAULT_SCREEN_HEIGHT: u32 = 40;

/// What the client told us about itself during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSettings {
    pub screen_width: u32,
    pub screen_height: u32,
    /// The client refused SGA, so prompts must end with IAC GA
    pub send_go_ahead: bool,
    pub msp_enabled: bool,
    pub msdp_enabled: bool,
    pub gmcp_enabled: bool,
    /// Enabled GMCP modules and their versions
    pub gmcp_modules: HashMap<String, i32>,
    pub client: ClientInfo,
    pub discord: DiscordInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
    pub is_mudlet: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscordInfo {
    pub user: String,
    pub private: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            screen_width: DEFAULT_SCREEN_WIDTH,
            screen_height: DEFAULT_SCREEN_HEIGHT,
            send_go_ahead: false,
            msp_enabled: false,
            msdp_enabled: false,
            gmcp_enabled: false,
            gmcp_modules: HashMap::new(),
            client: ClientInfo::default(),
            discord: DiscordInfo::default(),
        }
    }
}

impl ClientSettings {
    /// True when the client enabled `module` or one of its parents, so
    /// `Char` covers `Char.Vitals`.
    pub fn gmcp_module_enabled(&self, module: &str) -> bool {
        if !self.gmcp_enabled {
            return false;
        }
        let mut name = module;
        loop {
            if self.gmcp_modules.contains_key(name) {
                return true;
            }
            match name.rsplit_once('.') {
                Some((parent, _)) => name = parent,
                None => return false,
            }
        }
    }
}
