use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use rizz_contracts::entitlement::{
    BuildConfig, Entitlements, GrantKind, DEBUG_GRANT_MS, SHARE_GRANT_MS, SUBSCRIPTION_GRANT_MS,
};
use rizz_contracts::events::{new_session_id, Event, EventWriter};
use rizz_contracts::profiles::{
    self, Gender, Language, PartnerProfile, PersonalityType, Politeness, UserProfile,
};
use rizz_contracts::store::{keys, PrefsStore};
use rizz_engine::{
    generate_with_budget, GenerateError, ImageAttachment, SuggestionClient, SuggestionRequest,
    SuggestionResult, DEFAULT_CLIENT_BUDGET,
};

// Screenshot downscale applied before upload, matching the web client's
// canvas compression.
const MAX_SCREENSHOT_WIDTH: u32 = 800;
const SCREENSHOT_JPEG_QUALITY: u8 = 50;

const SHARE_URL: &str = "https://mbtirizz.com";
const SHARE_TEXT: &str = "Check out this AI Wingman! It writes the perfect replies.";

#[derive(Debug, Parser)]
#[command(name = "rizz", version, about = "Rizz suggestion engine CLI")]
struct Cli {
    /// Directory holding prefs.json and events.jsonl.
    #[arg(long, env = "RIZZ_DATA_DIR", default_value = ".rizz")]
    data_dir: PathBuf,
    /// Forces premium everywhere (app-store review builds).
    #[arg(long, env = "RIZZ_REVIEW_MODE")]
    review_mode: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or replace the user profile.
    Onboard(OnboardArgs),
    /// Manage saved partner profiles.
    Partner {
        #[command(subcommand)]
        command: PartnerCommand,
    },
    /// Analyze a chat screenshot and print reply suggestions.
    Analyze(AnalyzeArgs),
    /// Show entitlement and profile status.
    Status,
    /// Simulated share action; grants a one-hour unlock on completion.
    Share,
    /// Simulated subscription purchase; grants a thirty-day unlock.
    Subscribe,
    /// Simulated rewarded-ad completion; grants one free pass.
    AdReward,
    /// Debug toggle: clears an active grant or starts a one-hour one.
    ProToggle,
    /// Set the UI language.
    Lang {
        #[arg(value_parser = parse_language)]
        language: Language,
    },
    /// Clear all persisted data.
    Reset,
}

#[derive(Debug, Parser)]
struct OnboardArgs {
    #[arg(long, value_parser = parse_gender)]
    gender: Gender,
    #[arg(long)]
    age: u32,
    #[arg(long, default_value = "Unknown", value_parser = parse_personality)]
    personality: PersonalityType,
    #[arg(long, value_parser = parse_language)]
    language: Option<Language>,
}

#[derive(Debug, Subcommand)]
enum PartnerCommand {
    /// Add a partner, or edit one by passing --id.
    Add(PartnerAddArgs),
    List,
    Remove {
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, Parser)]
struct PartnerAddArgs {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    name: String,
    #[arg(long, value_parser = parse_gender)]
    gender: Option<Gender>,
    #[arg(long)]
    age: Option<u32>,
    #[arg(long)]
    relation: Option<String>,
    #[arg(long, value_parser = parse_personality)]
    personality: Option<PersonalityType>,
    #[arg(long)]
    goal: Option<String>,
    #[arg(long)]
    vibe: Option<String>,
    #[arg(long)]
    context: Option<String>,
    #[arg(long, value_parser = parse_language)]
    language: Option<Language>,
    #[arg(long, value_parser = parse_politeness)]
    politeness: Option<Politeness>,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// Chat screenshot to analyze.
    #[arg(long)]
    image: PathBuf,
    /// Saved partner id; optional when exactly one partner exists.
    #[arg(long)]
    partner: Option<String>,
    /// Override the model fallback list (repeatable, tried in order).
    #[arg(long = "model")]
    models: Vec<String>,
    /// Overall wall-clock budget in seconds.
    #[arg(long, default_value_t = DEFAULT_CLIENT_BUDGET.as_secs())]
    budget_secs: u64,
}

fn parse_gender(raw: &str) -> Result<Gender> {
    raw.parse()
}

fn parse_personality(raw: &str) -> Result<PersonalityType> {
    raw.parse()
}

fn parse_language(raw: &str) -> Result<Language> {
    raw.parse()
}

fn parse_politeness(raw: &str) -> Result<Politeness> {
    raw.parse()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = App::open(&cli.data_dir, BuildConfig {
        review_mode: cli.review_mode,
    })?;
    match cli.command {
        Command::Onboard(args) => app.onboard(args),
        Command::Partner { command } => app.partner(command),
        Command::Analyze(args) => app.analyze(args),
        Command::Status => app.status(),
        Command::Share => app.share(),
        Command::Subscribe => app.subscribe(),
        Command::AdReward => app.ad_reward(),
        Command::ProToggle => app.pro_toggle(),
        Command::Lang { language } => app.set_language(language),
        Command::Reset => app.reset(),
    }
}

struct App {
    store: PrefsStore,
    entitlements: Entitlements,
    events: EventWriter,
}

impl App {
    fn open(data_dir: &Path, config: BuildConfig) -> Result<Self> {
        let store = PrefsStore::new(data_dir.join("prefs.json"));
        let entitlements = Entitlements::load(store.clone(), config, now_ms())?;
        let events = EventWriter::new(data_dir.join("events.jsonl"), new_session_id());
        Ok(Self {
            store,
            entitlements,
            events,
        })
    }

    fn onboard(mut self, args: OnboardArgs) -> Result<()> {
        let profile = UserProfile {
            gender: args.gender,
            age: args.age,
            personality: args.personality,
        };
        profiles::save_user_profile(&mut self.store, &profile)?;
        if let Some(language) = args.language {
            self.store.set_string(keys::LANGUAGE, language.code())?;
        }
        println!(
            "Saved profile: {} / {} / {}",
            profile.gender, profile.age, profile.personality
        );
        Ok(())
    }

    fn partner(mut self, command: PartnerCommand) -> Result<()> {
        match command {
            PartnerCommand::Add(args) => {
                let mut partner = match &args.id {
                    Some(id) => profiles::load_partners(&mut self.store)
                        .shift_remove(id)
                        .with_context(|| format!("no saved partner with id '{id}'"))?,
                    None => PartnerProfile::new(args.name.clone()),
                };
                partner.name = args.name;
                if let Some(gender) = args.gender {
                    partner.gender = gender;
                }
                if args.age.is_some() {
                    partner.age = args.age;
                }
                if let Some(relation) = args.relation {
                    partner.relation = relation;
                }
                if let Some(personality) = args.personality {
                    partner.personality = personality;
                }
                if let Some(goal) = args.goal {
                    partner.goal = goal;
                }
                if let Some(vibe) = args.vibe {
                    partner.vibe = vibe;
                }
                if let Some(context) = args.context {
                    partner.context = context;
                }
                if let Some(language) = args.language {
                    partner.language = language;
                }
                if let Some(politeness) = args.politeness {
                    partner.politeness = politeness;
                }
                profiles::save_partner(&mut self.store, &partner)?;
                println!("Saved partner '{}' ({})", partner.name, partner.id);
            }
            PartnerCommand::List => {
                let partners = profiles::load_partners(&mut self.store);
                if partners.is_empty() {
                    println!("No saved partners.");
                }
                for partner in partners.values() {
                    println!(
                        "{}  {}  [{} / {} / {}]",
                        partner.id,
                        partner.name,
                        partner.relation,
                        partner.personality,
                        partner.language.code()
                    );
                }
            }
            PartnerCommand::Remove { id } => {
                if profiles::remove_partner(&mut self.store, &id)? {
                    println!("Removed partner {id}");
                } else {
                    bail!("no saved partner with id '{id}'");
                }
            }
        }
        Ok(())
    }

    fn analyze(mut self, args: AnalyzeArgs) -> Result<()> {
        let user = profiles::load_user_profile(&mut self.store)
            .context("no user profile; run `rizz onboard` first")?;
        let partner = self.resolve_partner(args.partner.as_deref())?;
        let ui_language = self.ui_language();
        let image = load_screenshot(&args.image)?;

        let client = SuggestionClient::from_env()
            .map_err(user_facing_error)?
            .with_models(args.models)
            .with_events(self.events.clone());
        let request = SuggestionRequest {
            user,
            partner,
            image,
            ui_language,
        };
        let budget = Duration::from_secs(args.budget_secs.max(1));
        let outcome = generate_with_budget(Arc::new(client), request, budget);
        let (result, access) =
            settle_generation(&mut self.entitlements, &self.events, outcome, now_ms())?;

        print_result(&result, access);
        if access.consumes_pass {
            println!(
                "\nFree passes remaining: {}",
                self.entitlements.free_passes()
            );
        }
        Ok(())
    }

    fn status(mut self) -> Result<()> {
        let now = now_ms();
        let premium = self.entitlements.is_premium(now);
        println!("Premium:      {}", if premium { "yes" } else { "no" });
        if self.entitlements.review_mode() {
            println!("Override:     review mode");
        }
        if self.entitlements.expiry_epoch_ms() > now {
            println!(
                "Grant:        {} ({} left)",
                self.entitlements.grant(),
                format_remaining(self.entitlements.expiry_epoch_ms() - now)
            );
        }
        println!("Free passes:  {}", self.entitlements.free_passes());
        println!("UI language:  {}", self.ui_language().code());
        match profiles::load_user_profile(&mut self.store) {
            Some(profile) => println!(
                "Profile:      {} / {} / {}",
                profile.gender, profile.age, profile.personality
            ),
            None => println!("Profile:      not onboarded"),
        }
        println!(
            "Partners:     {}",
            profiles::load_partners(&mut self.store).len()
        );
        Ok(())
    }

    fn share(mut self) -> Result<()> {
        println!("{SHARE_TEXT}");
        println!("{SHARE_URL}");
        let expiry = self
            .entitlements
            .grant_time_boxed(GrantKind::Share, SHARE_GRANT_MS, now_ms())?;
        self.emit(Event::GrantTimeBoxed {
            kind: GrantKind::Share.to_string(),
            expiry_epoch_ms: expiry,
            debug: false,
        });
        println!("Share recorded. Premium unlocked for 1 hour.");
        Ok(())
    }

    fn subscribe(mut self) -> Result<()> {
        let expiry =
            self.entitlements
                .grant_time_boxed(GrantKind::Subscription, SUBSCRIPTION_GRANT_MS, now_ms())?;
        self.emit(Event::GrantTimeBoxed {
            kind: GrantKind::Subscription.to_string(),
            expiry_epoch_ms: expiry,
            debug: false,
        });
        println!("Subscription active. Premium unlocked for 30 days.");
        Ok(())
    }

    fn ad_reward(mut self) -> Result<()> {
        let count = self.entitlements.grant_ad_reward_pass()?;
        self.emit(Event::AdRewardPass { free_passes: count });
        println!("Ad reward granted. Free passes: {count}");
        Ok(())
    }

    fn pro_toggle(mut self) -> Result<()> {
        let now = now_ms();
        if self.entitlements.is_premium(now) {
            self.entitlements.clear_grant()?;
            self.emit(Event::GrantCleared);
            println!("Premium grant cleared.");
        } else {
            let expiry = self
                .entitlements
                .grant_time_boxed(GrantKind::Subscription, DEBUG_GRANT_MS, now)?;
            self.emit(Event::GrantTimeBoxed {
                kind: GrantKind::Subscription.to_string(),
                expiry_epoch_ms: expiry,
                debug: true,
            });
            println!("Premium granted for 1 hour.");
        }
        Ok(())
    }

    fn set_language(mut self, language: Language) -> Result<()> {
        self.store.set_string(keys::LANGUAGE, language.code())?;
        println!("UI language set to {}", language.code());
        Ok(())
    }

    fn reset(mut self) -> Result<()> {
        self.entitlements.reset()?;
        self.emit(Event::EntitlementReset);
        println!("All data cleared.");
        Ok(())
    }

    fn resolve_partner(&mut self, id: Option<&str>) -> Result<PartnerProfile> {
        let partners = profiles::load_partners(&mut self.store);
        match id {
            Some(id) => partners
                .get(id)
                .cloned()
                .with_context(|| format!("no saved partner with id '{id}'")),
            None if partners.len() == 1 => partners
                .into_values()
                .next()
                .context("saved partner list changed underneath us"),
            None if partners.is_empty() => {
                bail!("no saved partners; run `rizz partner add` first")
            }
            None => bail!("multiple saved partners; pass --partner <id>"),
        }
    }

    fn ui_language(&mut self) -> Language {
        self.store
            .get_string(keys::LANGUAGE)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(Language::En)
    }

    fn emit(&self, event: Event) {
        let _ = self.events.emit(&event);
    }
}

/// Settles the entitlement side of one generation. Pass accounting happens
/// only on confirmed success, so a failed or timed-out call never burns a
/// pass.
fn settle_generation(
    entitlements: &mut Entitlements,
    events: &EventWriter,
    outcome: Result<SuggestionResult, GenerateError>,
    now_ms: i64,
) -> Result<(SuggestionResult, Access)> {
    let result = outcome.map_err(user_facing_error)?;
    let access = gate(entitlements.is_premium(now_ms), entitlements.free_passes());
    if access.consumes_pass {
        entitlements.consume_free_pass()?;
        let _ = events.emit(&Event::FreePassConsumed {
            remaining: entitlements.free_passes(),
        });
    }
    Ok((result, access))
}

/// Premium gate for one successful generation. A time-boxed grant or
/// review mode masks the pass counter entirely; otherwise one pass buys
/// the full result, and with neither the third reply stays hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Access {
    full_result: bool,
    consumes_pass: bool,
}

fn gate(premium: bool, free_passes: u32) -> Access {
    if premium {
        Access {
            full_result: true,
            consumes_pass: false,
        }
    } else if free_passes > 0 {
        Access {
            full_result: true,
            consumes_pass: true,
        }
    } else {
        Access {
            full_result: false,
            consumes_pass: false,
        }
    }
}

fn print_result(result: &SuggestionResult, access: Access) {
    println!("Rizz score: {}/100", result.attraction_score);
    if !result.commentary.is_empty() {
        println!("{}", result.commentary);
    }
    for (idx, reply) in result.replies.iter().enumerate() {
        let locked = !access.full_result && idx == 2;
        println!();
        println!("[{}] {}", idx + 1, reply.tone);
        if locked {
            println!("  ████████ locked ████████");
            println!("  Unlock the masterpiece reply: share, subscribe, or watch an ad.");
            continue;
        }
        println!("  {}", reply.text);
        if let Some(translation) = &reply.translation {
            println!("  ({translation})");
        }
        println!("  why: {}", reply.explanation);
    }
}

fn user_facing_error(err: GenerateError) -> anyhow::Error {
    let hint = match &err {
        GenerateError::Configuration => "System configuration error. Please contact support.",
        GenerateError::ClientTimeout { .. } => "The network is too slow right now. Please try again.",
        GenerateError::ExhaustedFallback { .. } => {
            "Failed to analyze the screenshot. Please try a different photo."
        }
        GenerateError::Internal(_) => "Something went wrong. Please try again.",
    };
    anyhow::Error::new(err).context(hint.to_string())
}

/// Decodes the screenshot, caps its width, and re-encodes as a small JPEG.
/// Mirrors the canvas compression the web client performed before upload.
fn load_screenshot(path: &Path) -> Result<ImageAttachment> {
    let decoded = image::open(path)
        .with_context(|| format!("failed reading screenshot {}", path.display()))?;
    compress_screenshot(&decoded)
}

fn compress_screenshot(decoded: &image::DynamicImage) -> Result<ImageAttachment> {
    let (width, height) = (decoded.width(), decoded.height());
    let scaled = if width > MAX_SCREENSHOT_WIDTH {
        let new_height =
            ((height as u64 * MAX_SCREENSHOT_WIDTH as u64) / width as u64).max(1) as u32;
        decoded.resize_exact(MAX_SCREENSHOT_WIDTH, new_height, FilterType::Triangle)
    } else {
        decoded.clone()
    };

    let rgb = scaled.to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, SCREENSHOT_JPEG_QUALITY);
    encoder
        .encode_image(&rgb)
        .context("failed encoding screenshot as JPEG")?;
    Ok(ImageAttachment {
        bytes,
        mime_type: "image/jpeg".to_string(),
    })
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn format_remaining(ms: i64) -> String {
    let total_seconds = (ms / 1000).max(0);
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, RgbaImage};
    use rizz_contracts::entitlement::INITIAL_FREE_PASSES;
    use rizz_engine::ReplySuggestion;

    use super::*;

    fn settle_fixture() -> (tempfile::TempDir, Entitlements, EventWriter) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = PrefsStore::new(temp.path().join("prefs.json"));
        let entitlements =
            Entitlements::load(store, BuildConfig::default(), 0).expect("load entitlements");
        let events = EventWriter::new(temp.path().join("events.jsonl"), "session-test");
        (temp, entitlements, events)
    }

    fn sample_result() -> SuggestionResult {
        let reply = |tone: &str| ReplySuggestion {
            tone: tone.to_string(),
            text: format!("{tone} reply."),
            translation: None,
            explanation: "keeps momentum".to_string(),
        };
        SuggestionResult {
            attraction_score: 64,
            commentary: "Solid footing.".to_string(),
            replies: vec![reply("Witty"), reply("Sweet"), reply("MASTERPIECE")],
        }
    }

    #[test]
    fn failed_generation_never_burns_a_pass() {
        let (_temp, mut entitlements, events) = settle_fixture();

        let timed_out = Err(GenerateError::ClientTimeout { budget_s: 45.0 });
        assert!(settle_generation(&mut entitlements, &events, timed_out, 0).is_err());
        let exhausted = Err(GenerateError::ExhaustedFallback {
            attempts: 3,
            last: "boom".to_string(),
        });
        assert!(settle_generation(&mut entitlements, &events, exhausted, 0).is_err());

        assert_eq!(entitlements.free_passes(), INITIAL_FREE_PASSES);
    }

    #[test]
    fn passes_drain_only_on_success_then_third_reply_locks() -> Result<()> {
        let (temp, mut entitlements, events) = settle_fixture();

        for used in 1..=INITIAL_FREE_PASSES {
            let (_, access) =
                settle_generation(&mut entitlements, &events, Ok(sample_result()), 0)?;
            assert!(access.full_result);
            assert!(access.consumes_pass);
            assert_eq!(entitlements.free_passes(), INITIAL_FREE_PASSES - used);
        }

        let (result, access) =
            settle_generation(&mut entitlements, &events, Ok(sample_result()), 0)?;
        assert!(!access.full_result);
        assert!(!access.consumes_pass);
        assert_eq!(result.replies.len(), 3);
        assert_eq!(entitlements.free_passes(), 0);

        let log = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        let consumed = log
            .lines()
            .filter(|line| line.contains("\"free_pass_consumed\""))
            .count();
        assert_eq!(consumed, INITIAL_FREE_PASSES as usize);
        Ok(())
    }

    #[test]
    fn active_grant_masks_the_pass_counter_on_success() -> Result<()> {
        let (_temp, mut entitlements, events) = settle_fixture();
        entitlements.grant_time_boxed(GrantKind::Share, SHARE_GRANT_MS, 0)?;

        let (_, access) = settle_generation(&mut entitlements, &events, Ok(sample_result()), 10)?;
        assert!(access.full_result);
        assert!(!access.consumes_pass);
        assert_eq!(entitlements.free_passes(), INITIAL_FREE_PASSES);
        Ok(())
    }

    #[test]
    fn gate_prefers_grant_over_passes() {
        let access = gate(true, 3);
        assert!(access.full_result);
        assert!(!access.consumes_pass);
    }

    #[test]
    fn gate_spends_a_pass_without_grant() {
        let access = gate(false, 3);
        assert!(access.full_result);
        assert!(access.consumes_pass);
    }

    #[test]
    fn gate_locks_third_reply_when_broke() {
        let access = gate(false, 0);
        assert!(!access.full_result);
        assert!(!access.consumes_pass);
    }

    #[test]
    fn wide_screenshot_is_downscaled_to_max_width() -> Result<()> {
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            1600,
            1200,
            image::Rgba([120, 40, 200, 255]),
        ));
        let attachment = compress_screenshot(&source)?;
        assert_eq!(attachment.mime_type, "image/jpeg");
        assert!(!attachment.bytes.is_empty());

        let reloaded = image::load_from_memory(&attachment.bytes)?;
        assert_eq!(reloaded.width(), MAX_SCREENSHOT_WIDTH);
        assert_eq!(reloaded.height(), 600);
        Ok(())
    }

    #[test]
    fn narrow_screenshot_keeps_its_size() -> Result<()> {
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            400,
            700,
            image::Rgba([10, 10, 10, 255]),
        ));
        let attachment = compress_screenshot(&source)?;
        let reloaded = image::load_from_memory(&attachment.bytes)?;
        assert_eq!((reloaded.width(), reloaded.height()), (400, 700));
        Ok(())
    }

    #[test]
    fn remaining_time_formats_by_magnitude() {
        assert_eq!(format_remaining(5_000), "5s");
        assert_eq!(format_remaining(125_000), "2m 5s");
        assert_eq!(format_remaining(3_700_000), "1h 1m");
        assert_eq!(format_remaining(90_000_000), "1d 1h");
        assert_eq!(format_remaining(-500), "0s");
    }

    #[test]
    fn timeout_maps_to_try_again_hint() {
        let err = user_facing_error(GenerateError::ClientTimeout { budget_s: 45.0 });
        assert!(err.to_string().contains("try again"));
        let err = user_facing_error(GenerateError::Configuration);
        assert!(err.to_string().contains("contact support"));
    }
}
