//! Account commands (`dashlink login|register|logout|whoami`).

use anyhow::{Context, Result};
use dialoguer::{Input, Password};

use dashlink::auth::{RegisterRequest, User};
use dashlink::config::ClientConfig;

use super::Session;

pub async fn cmd_login(
    config: &ClientConfig,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let session = Session::open(config)?;
    let email = match email {
        Some(email) => email,
        None => Input::<String>::new()
            .with_prompt("Email")
            .interact_text()
            .context("Failed to read email")?,
    };
    let password = match password {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    let user = session
        .auth()
        .login(&email, &password)
        .await
        .context("Login failed")?;
    print_signed_in(&user);
    Ok(())
}

pub async fn cmd_register(
    config: &ClientConfig,
    email: Option<String>,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
) -> Result<()> {
    let session = Session::open(config)?;
    let email = match email {
        Some(email) => email,
        None => Input::<String>::new().with_prompt("Email").interact_text()?,
    };
    let username = match username {
        Some(username) => username,
        None => Input::<String>::new().with_prompt("Username").interact_text()?,
    };
    let password = Password::new()
        .with_prompt("Password")
        .with_confirmation("Confirm password", "Passwords didn't match")
        .interact()
        .context("Failed to read password")?;

    let mut request = RegisterRequest::new(email, username, password);
    request.first_name = first_name;
    request.last_name = last_name;

    let user = session
        .auth()
        .register(&request)
        .await
        .context("Registration failed")?;
    print_signed_in(&user);
    Ok(())
}

pub async fn cmd_logout(config: &ClientConfig) -> Result<()> {
    let session = Session::open(config)?;
    if !session.store.is_authenticated() {
        println!("Not signed in.");
        return Ok(());
    }
    session.auth().logout().await;
    println!("{}", console::style("Signed out.").green());
    Ok(())
}

pub async fn cmd_whoami(config: &ClientConfig) -> Result<()> {
    let session = Session::open(config)?;
    if !session.store.is_authenticated() {
        println!("Not signed in.");
        return Ok(());
    }

    let user = match session.auth().profile().await {
        Ok(user) => user,
        Err(e) if e.is_session_expired() => {
            anyhow::bail!("Session expired. Run 'dashlink login' to sign in again.")
        }
        Err(e) => return Err(e).context("Failed to fetch profile"),
    };

    println!();
    println!("{}", console::style(user.display_name()).bold());
    println!("  email    {}", user.email);
    if !user.username.is_empty() {
        println!("  username {}", user.username);
    }
    if let Some(plan) = &user.plan {
        println!("  plan     {}", plan);
    }
    if let Some(end) = user.subscription_end_date {
        println!("  renews   {}", end.format("%Y-%m-%d"));
    }
    if !user.instagram_accounts.is_empty() {
        println!("  accounts {}", user.instagram_accounts.len());
    }
    println!();
    Ok(())
}

fn print_signed_in(user: &User) {
    println!(
        "{} {} <{}>",
        console::style("Signed in as").green(),
        console::style(user.display_name()).bold(),
        user.email
    );
}
