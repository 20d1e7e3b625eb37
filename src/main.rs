use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::fmt::Display;
use std::path::PathBuf;

use marketdash::cache::{CacheSource, EntryState, Resolution};
use marketdash::config::Config;
use marketdash::logging;
use marketdash::market::{
  CachedMarketClient, ChartInterval, ChartPeriod, ChartSeries, CompanyProfile, DividendData, FinancialData,
  ListingEntry, StockInfo, Suggestion, DEFAULT_DIVIDEND_YEARS,
};
use marketdash::query::ResolveOptions;

#[derive(Parser, Debug)]
#[command(name = "marketdash")]
#[command(about = "Fetch market data through a resilient cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./marketdash.yaml, then $XDG_CONFIG_HOME/marketdash/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Ignore cached data and refetch
  #[arg(short, long)]
  refresh: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Quote snapshot for a symbol
  Quote { symbol: String },
  /// Price history for a symbol
  Chart {
    symbol: String,
    #[arg(short, long, default_value_t)]
    period: ChartPeriod,
    #[arg(short, long, default_value_t)]
    interval: ChartInterval,
  },
  /// Search symbols and company names
  Search { query: String },
  /// Popular stocks
  Popular,
  /// Largest stocks by market cap
  Top,
  /// Constituents of an index (dow, nasdaq, sp500, russell2000)
  Index { name: String },
  /// Company description
  Profile { symbol: String },
  /// Headline financial statement figures
  Financial { symbol: String },
  /// Dividend history
  Dividends {
    symbol: String,
    /// Years of history, 1 to 10
    #[arg(short, long, default_value_t = DEFAULT_DIVIDEND_YEARS)]
    years: u32,
  },
  /// Compare 2 to 5 symbols, e.g. AAPL,MSFT,GOOGL
  Compare { symbols: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(&config.logging)?;

  let client = CachedMarketClient::new(&config)?;
  let options = ResolveOptions::default().with_force(args.refresh);

  match args.command {
    Command::Quote { symbol } => render(client.quote(&symbol, options).await?, print_quote),
    Command::Chart {
      symbol,
      period,
      interval,
    } => render(client.chart(&symbol, period, interval, options).await?, print_chart),
    Command::Search { query } => render(client.search(&query, options).await?, print_suggestions),
    Command::Popular => render(client.popular(options).await?, print_listing),
    Command::Top => render(client.top_market_cap(options).await?, print_listing),
    Command::Index { name } => render(client.index(&name, options).await?, print_listing),
    Command::Profile { symbol } => render(client.profile(&symbol, options).await?, print_profile),
    Command::Financial { symbol } => render(client.financial(&symbol, options).await?, print_financial),
    Command::Dividends { symbol, years } => {
      render(client.dividends(&symbol, years, options).await?, print_dividends)
    }
    Command::Compare { symbols } => render(client.compare(&symbols, options).await?, print_comparison),
  }

  Ok(())
}

/// Status header, then the payload if there is one.
fn render<T>(resolution: Resolution<T>, print: fn(&T)) {
  let status = match resolution.status {
    EntryState::Ready => "ready",
    EntryState::Loading => "loading",
    EntryState::Error => "error",
    EntryState::Idle => "idle",
  };
  let source = match resolution.source {
    Some(CacheSource::Network) => "network",
    Some(CacheSource::CacheFresh) => "cache",
    Some(CacheSource::CacheStale) => "cache (stale)",
    Some(CacheSource::Fallback) => "cache (stale, refresh failed)",
    None => "-",
  };

  println!("status:       {status}");
  println!("source:       {source}");
  match resolution.last_updated {
    Some(at) => println!("last updated: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
    None => println!("last updated: never"),
  }
  if resolution.dropped > 0 {
    println!("dropped:      {} malformed record(s)", resolution.dropped);
  }
  if let Some(error) = &resolution.error {
    println!("error:        {error}");
  }
  println!();

  if let Some(data) = &resolution.data {
    print(data);
  }
}

fn opt<T: Display>(value: Option<T>) -> String {
  value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn print_quote(info: &StockInfo) {
  println!("{} ({})", info.name, info.symbol);
  println!(
    "{:.2} {}  {:+.2} ({:+.2}%)",
    info.current_price, info.currency, info.change, info.change_percent
  );
  println!("previous close {:.2}", info.previous_close);
  println!("day range      {} - {}", opt(info.low), opt(info.high));
  println!("volume         {}", opt(info.volume));
  println!("market cap     {}", opt(info.market_cap));
  println!("p/e            {}", opt(info.pe_ratio));
  println!("exchange       {}", opt(info.exchange.as_deref()));
}

fn print_chart(series: &ChartSeries) {
  if series.points.is_empty() {
    println!("no data for {} ({}, {})", series.symbol, series.period, series.interval);
    return;
  }
  println!("{} ({}, {})", series.symbol, series.period, series.interval);
  println!(
    "{:<25} {:>10} {:>10} {:>10} {:>10} {:>14}",
    "timestamp", "open", "high", "low", "close", "volume"
  );
  for p in &series.points {
    println!(
      "{:<25} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>14.0}",
      p.timestamp, p.open, p.high, p.low, p.close, p.volume
    );
  }
}

fn print_suggestions(suggestions: &Vec<Suggestion>) {
  if suggestions.is_empty() {
    println!("no matches");
    return;
  }
  for s in suggestions {
    println!("{:<8} {:<40} {:<10} {}", s.symbol, s.name, s.exchange, s.kind);
  }
}

fn print_listing(entries: &Vec<ListingEntry>) {
  if entries.is_empty() {
    println!("no data");
    return;
  }
  for e in entries {
    println!(
      "{:<8} {:<32} {:>10.2} {:>+8.2}%  {:>18}",
      e.symbol,
      e.name,
      e.price,
      e.change_percent,
      opt(e.market_cap.map(|cap| format!("{cap:.0}")))
    );
  }
}

fn print_profile(profile: &CompanyProfile) {
  println!("{} ({})", profile.name, profile.symbol);
  println!("{} / {}", profile.sector, profile.industry);
  println!("headquarters {}", profile.headquarters);
  println!("employees    {}", profile.employees);
  println!("website      {}", profile.website);
  println!();
  let description = if profile.original_description.is_empty() {
    &profile.description
  } else {
    &profile.original_description
  };
  println!("{description}");
}

fn print_financial(data: &FinancialData) {
  println!("{} ({})", data.symbol, data.period);
  println!("revenue            {}", opt(data.revenue));
  println!("operating income   {}", opt(data.operating_income));
  println!("net income         {}", opt(data.net_income));
  println!("total assets       {}", opt(data.total_assets));
  println!("total liabilities  {}", opt(data.total_liabilities));
  println!("cash flow          {}", opt(data.cash_flow));
}

fn print_dividends(dividends: &Vec<DividendData>) {
  if dividends.is_empty() {
    println!("no dividends");
    return;
  }
  for d in dividends {
    println!("{:<12} {:>10.4}  {}", d.date, d.amount, d.kind);
  }
}

fn print_comparison(quotes: &Vec<StockInfo>) {
  if quotes.is_empty() {
    println!("no data");
    return;
  }
  println!(
    "{:<8} {:>10} {:>9} {:>18} {:>8}",
    "symbol", "price", "change", "market cap", "p/e"
  );
  for q in quotes {
    println!(
      "{:<8} {:>10.2} {:>+8.2}% {:>18} {:>8}",
      q.symbol,
      q.current_price,
      q.change_percent,
      opt(q.market_cap.map(|cap| format!("{cap:.0}"))),
      opt(q.pe_ratio.map(|pe| format!("{pe:.1}")))
    );
  }
}
