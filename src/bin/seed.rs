use anyhow::Context;
use clap::Parser;
use rand::{seq::SliceRandom, Rng};
use sqlx::postgres::PgPoolOptions;
use time::{Duration, OffsetDateTime};

use adminportal::auth::password::hash_password;
use adminportal::users::repo::{PgUserStore, UserStore};
use adminportal::users::repo_types::{NewUser, Role};

const ADMIN_EMAIL: &str = "admin@gmail.com";
const DEFAULT_PASSWORD: &str = "Password123";

const FIRST_NAMES: &[&str] = &[
    "Arjun", "Priya", "Rahul", "Anita", "Vikram", "Sneha", "Amit", "Kavya", "Rohit", "Meera",
    "Sanjay", "Pooja",
];
const LAST_NAMES: &[&str] = &["Kumar", "Sharma", "Singh", "Patel", "Reddy"];

/// Populates the users table with an admin and demo accounts.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Delete every user before seeding.
    #[arg(long)]
    purge: bool,

    /// Number of demo users to create.
    #[arg(long, default_value_t = 60)]
    count: usize,
}

/// Creation times spread like real sign-ups: busy recently, sparse further back.
fn demo_timestamps(count: usize, now: OffsetDateTime) -> Vec<OffsetDateTime> {
    let mut rng = rand::thread_rng();
    let buckets: [(f64, f64, usize); 5] = [
        (0.0, 1.0, 10),
        (1.0, 2.0, 20),
        (2.0, 7.0, 15),
        (7.0, 30.0, 10),
        (30.0, 90.0, 5),
    ];
    let mut out: Vec<OffsetDateTime> = buckets
        .iter()
        .flat_map(|&(from, to, n)| std::iter::repeat((from, to)).take(n))
        .chain(std::iter::repeat((0.0, 90.0)))
        .take(count)
        .map(|(from, to)| {
            let days = rng.gen_range(from..to);
            now - Duration::seconds_f64(days * 86_400.0)
        })
        .collect();
    out.shuffle(&mut rng);
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "seed=info".into()))
        .init();
    let args = Args::parse();

    let database_url = std::env::var("DATABASE_URL").context("missing env var DATABASE_URL")?;
    let db = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("run migrations")?;
    let users = PgUserStore::new(db);

    if args.purge {
        let removed = users.delete_all().await?;
        tracing::info!(removed, "purged users");
    }

    let hash = hash_password(DEFAULT_PASSWORD)?;

    if users.find_by_email(ADMIN_EMAIL).await?.is_none() {
        users
            .create(NewUser {
                name: "Admin User".into(),
                email: ADMIN_EMAIL.into(),
                password_hash: Some(hash.clone()),
                role: Role::Admin,
                profile_image: Some("https://api.dicebear.com/7.x/avataaars/svg?seed=admin".into()),
                google_id: None,
                created_at: None,
            })
            .await?;
        tracing::info!(email = ADMIN_EMAIL, "admin created");
    }

    let now = OffsetDateTime::now_utc();
    let mut created = 0usize;
    for (i, created_at) in demo_timestamps(args.count, now).into_iter().enumerate() {
        let first = FIRST_NAMES[i % FIRST_NAMES.len()];
        let last = LAST_NAMES[(i / FIRST_NAMES.len()) % LAST_NAMES.len()];
        let email = format!(
            "{}.{}{}@example.com",
            first.to_lowercase(),
            last.to_lowercase(),
            i + 1
        );
        if users.find_by_email(&email).await?.is_some() {
            continue;
        }
        users
            .create(NewUser {
                name: format!("{first} {last}"),
                email,
                password_hash: Some(hash.clone()),
                role: Role::User,
                profile_image: Some(format!(
                    "https://api.dicebear.com/7.x/avataaars/svg?seed=user{}",
                    i + 1
                )),
                google_id: None,
                created_at: Some(created_at),
            })
            .await?;
        created += 1;
    }

    tracing::info!(created, "demo users seeded");
    Ok(())
}
