//! Stats command: ranks, grade levels, and level transitions

use super::shared::{open_store, print_json};
use crate::Result;
use crate::app::models::SubjectKind;
use crate::app::services::statistics::{
    ExamStatistics, LevelConfigCache, LevelTransition, RankScope, Ranking, StatisticsCalculator,
    StudentStanding,
};
use crate::cli::args::{Args, OutputFormat, StatsArgs};
use crate::config::Config;
use colored::*;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct StatsReport<'a> {
    statistics: &'a ExamStatistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    transitions: Option<&'a [LevelTransition]>,
}

pub async fn run_stats(args: &Args, stats_args: &StatsArgs, config: Config) -> Result<()> {
    let store = open_store(&config).await?;
    let levels = Arc::new(LevelConfigCache::with_ttl_secs(
        store.clone(),
        config.statistics.cache_ttl_secs,
    ));
    let scope = stats_args.scope.unwrap_or(config.statistics.level_scope);
    let calculator = StatisticsCalculator::new(store, levels, scope);
    let level_config_id = stats_args
        .levels
        .as_deref()
        .unwrap_or(config.statistics.level_config_id.as_str());

    let exam = calculator.find_exam(&stats_args.exam).await?;
    let statistics = calculator.exam_statistics(&exam, level_config_id).await?;

    let subject = stats_args.subject.as_deref().unwrap_or(SubjectKind::Total.display_name());
    let transitions = match (&stats_args.entry, &stats_args.exit) {
        (Some(entry), Some(exit)) => {
            let entry = calculator.find_exam(entry).await?;
            let exit = calculator.find_exam(exit).await?;
            Some(
                calculator
                    .transitions(&entry, &exit, subject, level_config_id)
                    .await?,
            )
        }
        _ => None,
    };

    if args.output_format == OutputFormat::Json {
        return print_json(&StatsReport {
            statistics: &statistics,
            transitions: transitions.as_deref(),
        });
    }

    print_summaries(&statistics);
    if let Some(subject) = &stats_args.subject {
        print_standings(&statistics, subject);
    }
    if let (Some(transitions), Some(entry), Some(exit)) =
        (&transitions, &stats_args.entry, &stats_args.exit)
    {
        print_transitions(transitions, entry, exit, subject);
    }
    Ok(())
}

fn driving_rank(standing: &StudentStanding, scope: RankScope) -> Option<Ranking> {
    match scope {
        RankScope::Class => standing.class_rank,
        RankScope::Grade => standing.grade_rank,
        RankScope::School => standing.school_rank,
    }
}

fn format_score(score: Option<f64>) -> String {
    score
        .map(|s| format!("{:.1}", s))
        .unwrap_or_else(|| "-".to_string())
}

fn print_summaries(statistics: &ExamStatistics) {
    println!(
        "{} (levels '{}', ranked by {})",
        statistics.exam.title.bold(),
        statistics.level_config_id,
        statistics.level_scope
    );
    for summary in &statistics.subjects {
        let levels = summary
            .level_counts
            .iter()
            .map(|(code, count)| format!("{} {}", code, count))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {:<8} {:>4} records  mean {:>6}  max {:>6}  min {:>6}  {}",
            summary.subject,
            summary.records,
            format_score(summary.mean),
            format_score(summary.max),
            format_score(summary.min),
            levels.dimmed()
        );
    }
}

fn print_standings(statistics: &ExamStatistics, subject: &str) {
    let scope = statistics.level_scope;
    let mut standings: Vec<&StudentStanding> = statistics.standings_for(subject).collect();
    standings.sort_by_key(|standing| {
        driving_rank(standing, scope)
            .map(|ranking| ranking.rank)
            .unwrap_or(u32::MAX)
    });

    println!();
    println!("{} {}", "Standings".bold(), subject);
    for standing in standings {
        let rank = driving_rank(standing, scope)
            .map(|ranking| format!("{}/{}", ranking.rank, ranking.peers))
            .unwrap_or_else(|| "-".to_string());
        let level = standing
            .level
            .as_ref()
            .map(|level| level.code.as_str())
            .unwrap_or("-");
        println!(
            "  {:>8}  {:<12} {:<6} {:<10} {:>6}  {}",
            rank,
            standing.identity.student_id,
            standing.identity.name,
            standing.identity.class_name,
            format_score(standing.score),
            level.bold()
        );
    }
}

fn print_transitions(transitions: &[LevelTransition], entry: &str, exit: &str, subject: &str) {
    println!();
    println!(
        "{} {} -> {} ({})",
        "Transitions".bold(),
        entry,
        exit,
        subject
    );
    for transition in transitions {
        println!(
            "  {:<4} {:<8} entry {:>4}  kept {:>4} ({:>5.1}%)  raised {:>4} of {:>4} ({:>5.1}%)",
            transition.code,
            transition.label,
            transition.entry_count,
            transition.consolidated,
            transition.consolidation_rate * 100.0,
            transition.transformed,
            transition.below_count,
            transition.transformation_rate * 100.0
        );
    }
}
