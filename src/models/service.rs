use chrono::{DateTime, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Category {
    Restaurant,
    Hotel,
    Shopping,
    Fitness,
    Health,
    Beauty,
    Education,
    Entertainment,
    Services,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Restaurant => "Restaurant",
            Category::Hotel => "Hotel",
            Category::Shopping => "Shopping",
            Category::Fitness => "Fitness",
            Category::Health => "Health",
            Category::Beauty => "Beauty",
            Category::Education => "Education",
            Category::Entertainment => "Entertainment",
            Category::Services => "Services",
            Category::Other => "Other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Restaurant" => Some(Category::Restaurant),
            "Hotel" => Some(Category::Hotel),
            "Shopping" => Some(Category::Shopping),
            "Fitness" => Some(Category::Fitness),
            "Health" => Some(Category::Health),
            "Beauty" => Some(Category::Beauty),
            "Education" => Some(Category::Education),
            "Entertainment" => Some(Category::Entertainment),
            "Services" => Some(Category::Services),
            "Other" => Some(Category::Other),
            _ => None,
        }
    }

    /// Hotel bookings are priced and validated per night.
    pub fn is_lodging(&self) -> bool {
        matches!(self, Category::Hotel)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn of(date: NaiveDate) -> Self {
        use chrono::Datelike;
        match date.weekday() {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monday" => Some(DayOfWeek::Monday),
            "tuesday" => Some(DayOfWeek::Tuesday),
            "wednesday" => Some(DayOfWeek::Wednesday),
            "thursday" => Some(DayOfWeek::Thursday),
            "friday" => Some(DayOfWeek::Friday),
            "saturday" => Some(DayOfWeek::Saturday),
            "sunday" => Some(DayOfWeek::Sunday),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PricingModel {
    #[default]
    Fixed,
    PerHour,
    PerDay,
    PerPerson,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PriceConditions {
    #[serde(default)]
    pub days_of_week: Vec<DayOfWeek>,
    #[serde(default)]
    pub specific_dates: Vec<NaiveDate>,
    #[serde(default)]
    pub min_people: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecialPrice {
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub conditions: PriceConditions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pricing {
    #[serde(default)]
    pub pricing_model: PricingModel,
    pub base_price: Decimal,
    /// Evaluated in order; the first matching entry wins.
    #[serde(default)]
    pub special_prices: Vec<SpecialPrice>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DepositPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub percentage: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NoShowPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PaymentSettings {
    #[serde(default)]
    pub accept_online_payment: bool,
    #[serde(default)]
    pub deposit: DepositPolicy,
    #[serde(default)]
    pub charge_on_no_show: NoShowPolicy,
    /// Percent, 0 to 100.
    #[serde(default)]
    pub tax_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingSettings {
    #[serde(default)]
    pub requires_approval: bool,
    /// Hours.
    #[serde(default = "default_min_advance")]
    pub min_advance_booking: i64,
    /// Days.
    #[serde(default = "default_max_advance")]
    pub max_advance_booking: i64,
    /// Minutes; only meaningful while payment is pending.
    #[serde(default = "default_timeout")]
    pub booking_timeout: i64,
}

fn default_min_advance() -> i64 {
    1
}

fn default_max_advance() -> i64 {
    30
}

fn default_timeout() -> i64 {
    15
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            requires_approval: false,
            min_advance_booking: default_min_advance(),
            max_advance_booking: default_max_advance(),
            booking_timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationPolicy {
    #[serde(default = "default_true")]
    pub allow_cancellation: bool,
    #[serde(default = "default_free_hours")]
    pub free_cancellation_hours: i64,
    #[serde(default)]
    pub cancellation_fee: Decimal,
}

fn default_true() -> bool {
    true
}

fn default_free_hours() -> i64 {
    24
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            allow_cancellation: true,
            free_cancellation_hours: default_free_hours(),
            cancellation_fee: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatedSlot {
    pub date: NaiveDate,
    pub total_capacity: u32,
    #[serde(default)]
    pub bookings_made: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeekdaySlot {
    pub day_of_week: DayOfWeek,
    pub total_capacity: u32,
    #[serde(default)]
    pub bookings_made: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Availability {
    Dated {
        dates: Vec<DatedSlot>,
    },
    Recurring {
        recurring_start_date: NaiveDate,
        days_of_week: Vec<WeekdaySlot>,
    },
}

impl Availability {
    pub fn mode_str(&self) -> &'static str {
        match self {
            Availability::Dated { .. } => "dated",
            Availability::Recurring { .. } => "recurring",
        }
    }

    /// Every capacity slot in configuration order.
    pub fn slots(&self) -> Vec<CapacitySlot> {
        match self {
            Availability::Dated { dates } => dates
                .iter()
                .map(|d| CapacitySlot {
                    key: SlotKey::Date(d.date),
                    total_capacity: d.total_capacity,
                    bookings_made: d.bookings_made,
                })
                .collect(),
            Availability::Recurring { days_of_week, .. } => days_of_week
                .iter()
                .map(|d| CapacitySlot {
                    key: SlotKey::Weekday(d.day_of_week),
                    total_capacity: d.total_capacity,
                    bookings_made: d.bookings_made,
                })
                .collect(),
        }
    }

    pub fn slot(&self, key: &SlotKey) -> Option<CapacitySlot> {
        self.slots().into_iter().find(|s| &s.key == key)
    }
}

/// Identifies the single counter a booking draws on: a calendar date in
/// dated mode, a weekday in recurring mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    Date(NaiveDate),
    Weekday(DayOfWeek),
}

impl SlotKey {
    pub fn as_key(&self) -> String {
        match self {
            SlotKey::Date(d) => d.format("%Y-%m-%d").to_string(),
            SlotKey::Weekday(w) => w.as_str().to_string(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if let Some(day) = DayOfWeek::parse(s) {
            return Some(SlotKey::Weekday(day));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .map(SlotKey::Date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacitySlot {
    pub key: SlotKey,
    pub total_capacity: u32,
    pub bookings_made: u32,
}

impl CapacitySlot {
    pub fn remaining(&self) -> i64 {
        self.total_capacity as i64 - self.bookings_made as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Category,
    pub media_urls: Vec<String>,
    pub pricing: Pricing,
    pub payment_settings: PaymentSettings,
    pub booking_settings: BookingSettings,
    pub cancellation_policy: CancellationPolicy,
    pub availability: Availability,
    pub custom_details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
