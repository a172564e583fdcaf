use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use uuid::Uuid;

use memorepo::{
    ETaggable, EntitySchema, FieldType, Identifiers, Keyed, QueryMap, Repository, RepositoryConfig, Serializable,
};

#[derive(Parser)]
#[command(name = "memorepo")]
#[command(about = "Load users into an in-memory repository and query them")]
struct Cli {
    /// JSON array of `{id, email, age, country}` objects; a missing id is
    /// replaced by a random UUID
    #[arg(long)]
    users: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// One page of users, e.g. `--param country=NO --param limit=2`
    List {
        #[arg(long = "param")]
        params: Vec<String>,
        #[arg(long)]
        page_token: Option<String>,
    },
    /// Aggregate users, e.g. `--param 'aggregate={"function":"COUNT"}'`
    Aggregate {
        #[arg(long = "param")]
        params: Vec<String>,
    },
    /// Read a single user
    Get { id: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
struct User {
    #[serde(default)]
    id: String,
    email: String,
    age: i64,
    country: String,
    #[serde(skip)]
    etag: Option<String>,
}

impl Keyed for User {
    fn describe() -> memorepo::Result<EntitySchema<Self>> {
        EntitySchema::builder("User")
            .hash_key("id")
            .field("id", FieldType::Text, |u: &User| u.id.clone().into(), |u, v| {
                u.id = v.into_text()?;
                Ok(())
            })
            .field("email", FieldType::Text, |u: &User| u.email.clone().into(), |u, v| {
                u.email = v.into_text()?;
                Ok(())
            })
            .field("age", FieldType::Integer, |u: &User| u.age.into(), |u, v| {
                u.age = v.into_i64()?;
                Ok(())
            })
            .field("country", FieldType::Text, |u: &User| u.country.clone().into(), |u, v| {
                u.country = v.into_text()?;
                Ok(())
            })
            .global_index("byCountry", "country", "age")
            .build()
    }
}

impl Serializable for User {}

impl ETaggable for User {
    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn set_etag(&mut self, etag: String) {
        self.etag = Some(etag);
    }
}

fn query_map(params: &[String]) -> Result<QueryMap> {
    let mut query = QueryMap::new();
    for param in params {
        let (key, value) = param
            .split_once('=')
            .ok_or_else(|| anyhow!("Parameter '{}' is not of the form key=value", param))?;
        query.entry(key.to_string()).or_default().push(value.to_string());
    }
    Ok(query)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let raw = fs::read_to_string(&cli.users).with_context(|| format!("reading {}", cli.users.display()))?;
    let mut users: Vec<User> = serde_json::from_str(&raw).context("parsing users")?;
    for user in users.iter_mut().filter(|u| u.id.is_empty()) {
        user.id = Uuid::new_v4().to_string();
    }

    let repository = Repository::<User>::in_memory(RepositoryConfig::default()).await?;
    repository.create(users).await?;

    let output = match cli.command {
        Command::List { params, page_token } => {
            let mut query = query_map(&params)?;
            if let Some(token) = page_token {
                query.insert("pageToken".to_string(), vec![token]);
            }
            let pack = repository.query_pack("/users", &query, None)?;
            let result = repository.read_all(&Identifiers::root(), &pack).await?;
            result.item_list.to_json(pack.projections())?
        }
        Command::Aggregate { params } => {
            let pack = repository.query_pack("/users", &query_map(&params)?, None)?;
            repository.aggregation(&Identifiers::root(), &pack).await?.content
        }
        Command::Get { id } => {
            let result = repository.read(&Identifiers::hash(id), false, &[]).await?;
            result.item.to_document(&[])?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
