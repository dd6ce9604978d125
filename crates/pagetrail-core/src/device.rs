use crate::visit::Device;

impl Device {
    /// Classify a `User-Agent` string via the `woothee` crate.
    ///
    /// Returns `None` when the string is empty or woothee cannot recognise a
    /// browser at all (crawlers, CLI clients, server-side renders). Callers
    /// treat `None` as "not a browser context" and skip tracking instead of
    /// recording an `unknown` visit.
    ///
    /// woothee `category` maps to our device convention:
    ///   "pc"                         → desktop
    ///   "smartphone" (iPad, Android) → tablet, see [`is_tablet`]
    ///   "smartphone" | "mobilephone" → mobile
    ///   "appliance"                  → unknown (game consoles, TVs)
    ///   "misc" | "UNKNOWN" | crawler → not a browser (curl, wget, bots)
    pub fn from_user_agent(user_agent: &str) -> Option<Device> {
        if user_agent.trim().is_empty() {
            return None;
        }

        let result = woothee::parser::Parser::new().parse(user_agent)?;
        match result.category {
            "pc" => Some(Device::Desktop),
            "smartphone" if is_tablet(result.os, user_agent) => Some(Device::Tablet),
            "smartphone" | "mobilephone" => Some(Device::Mobile),
            "appliance" => Some(Device::Unknown),
            _ => None,
        }
    }
}

/// woothee files tablets under "smartphone"; split them back out by OS and
/// the conventional UA markers (Android tablets omit the "Mobile" token).
fn is_tablet(os: &str, user_agent: &str) -> bool {
    os == "iPad"
        || user_agent.contains("Tablet")
        || (os == "Android" && !user_agent.contains("Mobile"))
}
