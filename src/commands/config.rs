use anyhow::Result;

use crate::Context;
use crate::cli::ConfigCommand;
use crate::config::Settings;
use crate::paths;
use crate::ui;

pub fn run(ctx: &Context, cmd: &ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx),
    }
}

fn show(ctx: &Context) -> Result<()> {
    ui::header("Configuration");

    let settings_path = Settings::path()?;
    println!();
    ui::kv("Config directory", &paths::config_dir()?.display().to_string());
    ui::kv("Settings file", &describe(&settings_path));
    ui::kv("Desired state", &describe(&ctx.desired_path));
    ui::kv("State file", &describe(&ctx.state_path));

    let settings = &ctx.settings;
    ui::section("Settings");
    ui::kv("profile", settings.profile.as_deref().unwrap_or("(default)"));
    ui::kv("region", settings.region.as_deref().unwrap_or("(default)"));
    ui::kv("jobs", &settings.jobs.to_string());
    ui::kv(
        "retry",
        &format!(
            "{} attempts, {}ms base delay, {}ms max delay",
            settings.retry.max_attempts, settings.retry.base_delay_ms, settings.retry.max_delay_ms
        ),
    );
    ui::kv("password_length", &settings.password_length.to_string());

    println!();
    ui::dim(&format!(
        "Override directories with {} and {}.",
        paths::ENV_CONFIG_DIR,
        paths::ENV_STATE_DIR
    ));
    Ok(())
}

fn describe(path: &std::path::Path) -> String {
    if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found)", path.display())
    }
}
