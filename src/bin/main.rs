use clap::Parser;
use moara::{
    config::AssistantConfig,
    llm::select_adapter,
    loader::DataLoader,
    session::{AnswerMode, ChatSession},
    validator::ResponseValidator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Moara - assistente financeiro no terminal
#[derive(Parser, Debug)]
#[command(name = "moara", version, about)]
struct Args {
    /// Directory with transacoes.csv, historico_atendimento.csv,
    /// perfil_investidor.json and produtos_financeiros.json
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Answer from the full data context instead of intent routing
    #[arg(long)]
    dynamic: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so they do not mix with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = AssistantConfig::from_env()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    let mode = if args.dynamic {
        AnswerMode::Dynamic
    } else {
        AnswerMode::Routed
    };

    let data = match DataLoader::new(&config.data_dir).load_all() {
        Ok(data) => Arc::new(data),
        Err(e) => {
            eprintln!("Erro ao carregar dados: {}", e);
            eprintln!(
                "Verifique se todos os arquivos necessários estão em {}",
                config.data_dir.display()
            );
            std::process::exit(1);
        }
    };

    let adapter = select_adapter(&config.llm);
    info!(provider = %adapter.provider(), mode = ?mode, "Starting chat");

    let mut session = ChatSession::start(data, adapter.clone(), mode, &config);

    let mut stdout = tokio::io::stdout();
    let status = if adapter.is_llm() {
        format!("LLM ativo: {}", adapter.provider())
    } else {
        "Modo determinístico (sem LLM)".to_string()
    };
    stdout
        .write_all(
            format!(
                "Moara - Agente Financeiro [{}]\nComandos: /detalhes, /limpar, /sair\n\nMoara: {}\n",
                status,
                session.welcome_message()
            )
            .as_bytes(),
        )
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all("\nVocê: ".as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        let output = match input {
            "" => continue,
            "/sair" => break,
            "/limpar" => {
                session.clear();
                format!("Conversa limpa.\n\nMoara: {}\n", session.welcome_message())
            }
            "/detalhes" => match session.history().last_assistant() {
                Some(message) if message.has_details() => {
                    let mut out = String::new();
                    if !message.detail.is_empty() {
                        out.push_str(&format!("{}\n", message.detail));
                    }
                    if !message.sources.is_empty() {
                        out.push_str(&format!(
                            "{}\n",
                            ResponseValidator::format_sources(&message.sources)
                        ));
                    }
                    out
                }
                _ => "Sem detalhes para a última resposta.\n".to_string(),
            },
            query => {
                let reply = session.process_user_input(query).await;
                let mut out = format!("Moara: {}\n", reply.content);
                if !reply.justification.is_empty() {
                    out.push_str(&format!("  ({})\n", reply.justification));
                }
                if !reply.detail.is_empty() || !reply.sources.is_empty() {
                    out.push_str("  Digite /detalhes para ver mais.\n");
                }
                out
            }
        };

        stdout.write_all(output.as_bytes()).await?;
    }

    stdout.write_all("\nAté logo!\n".as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
