use {anyhow::Result, clap::Subcommand, outlook_oauth::AuthStatus};

use crate::App;

#[derive(Subcommand)]
pub enum AuthAction {
    /// Sign in with a Microsoft account in the browser.
    Login {
        /// Print the link instead of opening a browser.
        #[arg(long)]
        no_browser: bool,
    },
    /// Show the cached token state.
    Status,
    /// Remove the cached tokens.
    Logout,
}

pub async fn handle_auth(app: &App, action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Login { no_browser } => login(app, no_browser).await,
        AuthAction::Status => {
            status(app);
            Ok(())
        },
        AuthAction::Logout => {
            app.session.logout().await?;
            println!("Logged out.");
            Ok(())
        },
    }
}

async fn login(app: &App, no_browser: bool) -> Result<()> {
    let login = app.session.begin_login().await?;
    let url = login.authorization_url().to_string();

    if no_browser {
        println!("Open this link to sign in:\n{}", login.start_url());
    } else {
        println!("Opening browser for authentication...");
        if open::that(&url).is_err() {
            println!("Could not open browser. Please visit:\n{}", login.start_url());
        }
    }

    println!(
        "Waiting for the callback on {} ...",
        app.session.config().redirect_uri
    );
    let record = login.complete().await?;

    println!(
        "Signed in. Granted scopes: {}",
        record.scopes.iter().cloned().collect::<Vec<_>>().join(" ")
    );
    Ok(())
}

fn status(app: &App) {
    let path = app.session.config().token_store_path.display().to_string();
    match app.session.status() {
        AuthStatus::NoToken => println!("Not signed in ({path})."),
        AuthStatus::Valid { expires_in_secs } => {
            let hours = expires_in_secs / 3600;
            let mins = (expires_in_secs % 3600) / 60;
            println!("Signed in [valid ({hours}h {mins}m remaining)] ({path})");
        },
        AuthStatus::Expired { refreshable: true } => {
            println!("Signed in [expired, will refresh on next use] ({path})");
        },
        AuthStatus::Expired { refreshable: false } => {
            println!("Signed in [expired, run `outlook-assistant auth login`] ({path})");
        },
    }
}
