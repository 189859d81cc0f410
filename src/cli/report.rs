use std::fmt::Display;

use anyhow::Result;
use chrono::{DateTime, Duration, Local, NaiveDate};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};
use now::DateTimeNow;

use crate::{
    daemon::storage::ledger::Ledger,
    impact::{Impact, ImpactFactors},
    utils::{
        percentage::{seconds_share, Percentage},
        time::format_duration,
    },
};

use super::{
    output::{daily_aggregates, top_domains, DomainTotal},
    Args,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct ReportCommand {
    #[arg(
        long = "start",
        short,
        help = "First day of the report. Examples are \"yesterday\", \"last monday\", \"15/03/2025\". Defaults to the start of the current week"
    )]
    start_date: Option<String>,
    #[arg(
        long = "end",
        short,
        help = "Last day of the report. Examples are \"yesterday\", \"15/03/2025\". Defaults to today"
    )]
    end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
    #[arg(short, long, default_value_t = 5, help = "Number of domains listed")]
    top: usize,
    #[arg(
        short = 'p',
        long = "min-share",
        default_value = "0",
        help = "Hide domains below this share of the total time, e.g. \"5%\""
    )]
    min_share: Percentage,
}

/// Weekly recap style report: per day totals followed by the domains with the highest energy
/// use over the range.
pub fn process_report_command(
    ReportCommand {
        start_date,
        end_date,
        date_style,
        top,
        min_share,
    }: ReportCommand,
    ledger: &Ledger,
    factors: &ImpactFactors,
) -> Result<()> {
    let now = Local::now();
    let (start, end) = parse_range(start_date, end_date, date_style, now)?;

    let days = daily_aggregates(ledger, start, end, factors);
    let total_seconds = days.iter().map(|day| day.seconds).sum::<u64>();
    let total_impact = days
        .iter()
        .fold(Impact::default(), |total, day| total + day.impact);

    for day in &days {
        println!(
            "{}\t{}\t{}",
            day.date.format("%a %x"),
            format_duration(Duration::seconds(day.seconds as i64)),
            format_impact(&day.impact),
        );
    }
    println!(
        "Total\t{}\t{}",
        format_duration(Duration::seconds(total_seconds as i64)),
        format_impact(&total_impact),
    );
    println!();

    print_domains(
        &top_domains(ledger, start, end, factors, top),
        total_seconds,
        min_share,
    );
    Ok(())
}

/// Today's domains, all of them.
pub fn process_today_command(ledger: &Ledger, factors: &ImpactFactors) {
    let today = Local::now().date_naive();
    let domains = top_domains(ledger, today, today, factors, usize::MAX);
    let total_seconds = domains.iter().map(|domain| domain.seconds).sum();
    if domains.is_empty() {
        println!("Nothing tracked today");
        return;
    }
    print_domains(&domains, total_seconds, Percentage::default());
}

fn print_domains(domains: &[DomainTotal], total_seconds: u64, min_share: Percentage) {
    for entry in domains {
        let share = seconds_share(entry.seconds, total_seconds);
        if share < min_share {
            continue;
        }
        println!(
            "{}%\t{}\t{}\t{}",
            *share as i32,
            format_duration(Duration::seconds(entry.seconds as i64)),
            format_impact(&entry.impact),
            entry.domain,
        );
    }
}

fn format_impact(impact: &Impact) -> String {
    format!(
        "{:.2}Wh\t{:.4}L\t{:.2}g CO2",
        impact.energy_wh, impact.water_liters, impact.co2_grams
    )
}

/// Resolves the report range to calendar days in the local timezone.
fn parse_range(
    start_date: Option<String>,
    end_date: Option<String>,
    date_style: DateStyle,
    now: DateTime<Local>,
) -> Result<(NaiveDate, NaiveDate)> {
    let dialect: chrono_english::Dialect = date_style.into();
    let start = match start_date.map(|s| parse_date_string(&s, now, dialect)) {
        Some(Ok(v)) => v.with_timezone(&Local),
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate start date {e}"),
                )
                .into());
        }
        None => now.beginning_of_week(),
    };
    let end = match end_date.map(|s| parse_date_string(&s, now, dialect)) {
        Some(Ok(v)) => v.with_timezone(&Local),
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate end date {e}"),
                )
                .into());
        }
        None => now,
    };
    Ok((start.date_naive(), end.date_naive()))
}
