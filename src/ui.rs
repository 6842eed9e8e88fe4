//! Interface de terminal do curator: barras de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para progresso e `console` para estilização
//! com cores. O [`RunProgress`] acompanha visualmente a execução de um
//! pipeline, passo a passo.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use curator::lifecycle::AuditRecord;
use curator::model::{Recommendation, ScoreResult};
use curator::pipeline::{ExecutionStatus, PipelineExecution};

/// Indicador visual de progresso para a execução de um pipeline.
///
/// Exibe uma barra com um passo por unidade e, ao final, uma linha colorida
/// para sucesso (verde), falha (vermelho) e timeout ou cancelamento (amarelo).
pub struct RunProgress {
    // Barra de progresso do indicatif.
    pb: ProgressBar,
    // Estilo verde para execuções concluídas.
    green: Style,
    // Estilo vermelho para falhas e erros críticos.
    red: Style,
    // Estilo amarelo para timeout, cancelamento e passos ignorados.
    yellow: Style,
}

impl RunProgress {
    /// Inicia a barra com o nome do pipeline e o total de passos.
    pub fn start(pipeline: &str, total_steps: usize) -> Self {
        let pb = ProgressBar::new(total_steps as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message(pipeline.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Cópia da barra que o callback de progresso do motor pode mover.
    pub fn bar(&self) -> ProgressBar {
        self.pb.clone()
    }

    /// Limpa a barra e imprime o resultado e os erros de cada passo.
    pub fn complete(&self, execution: &PipelineExecution) {
        self.pb.finish_and_clear();
        let mut summary = format!(
            "{} ({}/{} steps)",
            execution.status, execution.completed_steps, execution.total_steps
        );
        if let Some(ms) = execution.duration_ms() {
            summary.push_str(&format!(" in {ms}ms"));
        }
        match execution.status {
            ExecutionStatus::Completed => println!("  {} {summary}", self.green.apply_to("✓")),
            ExecutionStatus::Timeout | ExecutionStatus::Cancelled => {
                println!("  {} {summary}", self.yellow.apply_to("⏱"))
            }
            _ => println!("  {} {summary}", self.red.apply_to("✗")),
        }
        for failure in &execution.errors {
            let marker = if failure.critical {
                self.red.apply_to("critical")
            } else {
                self.yellow.apply_to("skipped")
            };
            println!(
                "    step {} ({}) {marker} after {} attempt(s): {}",
                failure.index, failure.name, failure.attempts, failure.message
            );
        }
    }
}

/// Imprime as pontuações ranqueadas, uma linha por item, coloridas pela recomendação.
pub fn print_ranking(results: &[&ScoreResult]) {
    let green = Style::new().green();
    let yellow = Style::new().yellow();
    let red = Style::new().red();
    let dim = Style::new().dim();

    for (place, result) in results.iter().enumerate() {
        let style = match result.recommendation {
            Recommendation::Approve => &green,
            Recommendation::Review => &yellow,
            Recommendation::Reject => &red,
        };
        let criteria = result
            .criteria
            .iter()
            .map(|(name, score)| format!("{name}={score}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:>3}. {} {:<8} {}  {}",
            place + 1,
            style.apply_to(format!("{:>3}", result.score)),
            result.recommendation.to_string(),
            result.item_id,
            dim.apply_to(criteria),
        );
    }
}

/// Imprime o registro de auditoria formatado em JSON.
pub fn print_audit(record: &AuditRecord) {
    let header = Style::new().cyan().bold();
    println!();
    println!("{}", header.apply_to("─── Audit Record ───"));
    println!(
        "{}",
        serde_json::to_string_pretty(record).unwrap_or_default()
    );
}
