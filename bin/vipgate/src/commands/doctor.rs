use vipgate_bot::TelegramApi;
use vipgate_core::{Config, Paths};
use vipgate_scraper::browser::find_browser_binary;
use vipgate_storage::Store;

/// Run environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("🩺 vipgate doctor");
    println!("=================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Config ---
    println!("📋 Configuration");
    if paths.config_file().exists() {
        print_ok("Config file exists", &paths.config_file().display().to_string());
        ok_count += 1;
    } else {
        print_warn("Config file not found", "Defaults apply; create config.json to customize");
        warn_count += 1;
    }

    let config = Config::load_or_default(&paths)?;

    if let Some(url) = config.profile_url() {
        print_ok("Donation profile configured", &url);
        ok_count += 1;
    } else {
        print_err("Donation username not set", "Set donation.username or DONATION_USERNAME");
        err_count += 1;
    }

    if config.donation.webhook_secret.is_empty() {
        print_warn("Webhook secret empty", "Signature verification disabled");
        warn_count += 1;
    } else {
        print_ok("Webhook secret configured", "");
        ok_count += 1;
    }
    println!();

    // --- 2. Browser ---
    println!("🌐 Browser");
    let binary = if config.scraper.browser_path.is_empty() {
        find_browser_binary()
    } else {
        Some(config.scraper.browser_path.clone())
    };
    match binary {
        Some(path) => {
            print_ok("Chrome/Chromium found", &path);
            ok_count += 1;
        }
        None => {
            print_err("Chrome/Chromium not found", "Install Chrome or set scraper.browserPath");
            err_count += 1;
        }
    }
    println!();

    // --- 3. Storage ---
    println!("💾 Storage");
    paths.ensure_dirs()?;
    match Store::open(&paths.db_file()) {
        Ok(store) => {
            print_ok("Database opens", &paths.db_file().display().to_string());
            ok_count += 1;
            match store.list_invoices(1) {
                Ok(_) => {
                    print_ok("Schema ready", "");
                    ok_count += 1;
                }
                Err(e) => {
                    print_err("Schema check failed", &e.to_string());
                    err_count += 1;
                }
            }
        }
        Err(e) => {
            print_err("Database unavailable", &e.to_string());
            err_count += 1;
        }
    }
    println!();

    // --- 4. Telegram ---
    println!("🤖 Telegram");
    if config.bot.token.is_empty() {
        print_warn("Bot token not set", "Bot loop and invites disabled; set BOT_TOKEN");
        warn_count += 1;
    } else {
        let api = TelegramApi::new(&config.bot.token);
        match api.get_me().await {
            Ok(me) => {
                let handle = me.username.as_deref().unwrap_or("<unknown>");
                print_ok("Bot token valid", &format!("@{}", handle));
                ok_count += 1;
            }
            Err(e) => {
                print_err("getMe failed", &e.to_string());
                err_count += 1;
            }
        }
    }

    let gate = &config.bot.gate;
    let gated = gate.group_ids.len() + gate.channel_ids.len();
    if gated == 0 {
        print_warn("No gated chats configured", "Membership gate is open");
        warn_count += 1;
    } else {
        print_ok(&format!("{} gated chats configured", gated), "");
        ok_count += 1;
    }

    // --- Summary ---
    println!();
    println!("Summary: {} ok, {} warnings, {} errors", ok_count, warn_count, err_count);
    if err_count > 0 {
        println!("Fix the errors above before running `vipgate serve`.");
    }
    println!();
    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {}: {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {}: {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {}: {}", label, hint);
    }
}
