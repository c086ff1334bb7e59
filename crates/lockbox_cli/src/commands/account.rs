//! Register and login command implementation.

use super::Session;

/// Which account call to make.
#[derive(Debug, Clone, Copy)]
pub enum Action {
    /// Create a new account.
    Register,
    /// Log in to an existing one.
    Login,
}

/// Runs register or login and stores the token in the state file.
pub async fn run(
    session: &Session,
    action: Action,
    user: &str,
    password: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = session.engine_or_init()?;
    match action {
        Action::Register => engine.register(user, password).await?,
        Action::Login => engine.login(user, password).await?,
    }

    let state = engine.store().state();
    println!(
        "Logged in as {} (user {}, client {})",
        user,
        state.user_id.unwrap_or_default(),
        state.client_id
    );
    engine.shutdown().await?;
    Ok(())
}
