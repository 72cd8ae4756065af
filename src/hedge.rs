//! Core hedge contract and price record types
use super::error::HedgeError;
use chrono::{DateTime, TimeZone, Utc};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeType {
    #[n(0)]
    Call,
    #[n(1)]
    Put,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Settled,
    #[n(2)]
    Cancelled,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone + PartialEq> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl<T: TimeZone + Eq> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// One recorded price-hedging agreement between a farmer and the platform.
///
/// Quantities and prices are integers in the smallest price unit, no floats,
/// so gain/loss arithmetic cannot drift. `gain_loss` is written exactly once,
/// by settlement, and never recomputed afterwards.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Hedge {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub farmer_id: String,
    #[n(2)]
    pub commodity: String,
    #[n(3)]
    pub quantity: u64,
    #[n(4)]
    pub strike_price: u64,
    #[n(5)]
    pub reference_price: u64,
    #[n(6)]
    pub start_time: TimeStamp<Utc>,
    #[n(7)]
    pub maturity_time: TimeStamp<Utc>,
    #[n(8)]
    pub hedge_type: HedgeType,
    #[n(9)]
    pub status: HedgeStatus,
    #[n(10)]
    pub gain_loss: Option<i64>,
    #[n(11)]
    pub location: String,
}

/// Latest known price for one commodity. The oracle keeps only the current
/// value, full price history lives in the ledger as PriceUpdate transactions.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PriceRecord {
    #[n(0)]
    pub commodity: String,
    #[n(1)]
    pub price: u64,
    #[n(2)]
    pub updated_at: TimeStamp<Utc>,
}

// Also used for constructing drafts before the registry assigns an id
#[derive(Debug, Default)]
pub struct HedgeDraft {
    // No id field, the registry's sequencer assigns it on finalise
    farmer_id: Option<String>,
    commodity: Option<String>,
    quantity: u64,
    strike_price: u64,
    reference_price: u64,
    maturity_time: Option<TimeStamp<Utc>>,
    hedge_type: Option<HedgeType>,
    location: String,
}

impl HedgeDraft {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_farmer(mut self, farmer_id: impl Into<String>) -> Self {
        self.farmer_id = Some(farmer_id.into());
        self
    }
    pub fn set_commodity(mut self, commodity: impl Into<String>) -> Self {
        self.commodity = Some(commodity.into());
        self
    }
    pub fn set_quantity(mut self, quantity: u64) -> Self {
        self.quantity = quantity;
        self
    }
    pub fn set_strike_price(mut self, price: u64) -> Self {
        self.strike_price = price;
        self
    }
    pub fn set_reference_price(mut self, price: u64) -> Self {
        self.reference_price = price;
        self
    }
    pub fn set_maturity(mut self, maturity: TimeStamp<Utc>) -> Self {
        self.maturity_time = Some(maturity);
        self
    }
    pub fn set_type(mut self, hedge_type: HedgeType) -> Self {
        self.hedge_type = Some(hedge_type);
        self
    }
    pub fn set_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    // Checks fields, performs validation and produces the Active hedge.
    // The id comes from the registry sequencer, not the draft.
    pub(crate) fn finalise(
        self,
        id: u64,
        start_time: TimeStamp<Utc>,
    ) -> Result<Hedge, HedgeError> {
        let farmer_id = self
            .farmer_id
            .filter(|f| !f.is_empty())
            .ok_or_else(|| HedgeError::Validation("farmer id is not set".into()))?;
        let commodity = self
            .commodity
            .filter(|c| !c.is_empty())
            .ok_or_else(|| HedgeError::Validation("commodity must be a non-empty label".into()))?;
        if self.quantity == 0 {
            return Err(HedgeError::Validation("quantity must be positive".into()));
        }
        if self.strike_price == 0 {
            return Err(HedgeError::Validation("strike price must be positive".into()));
        }
        if self.reference_price == 0 {
            return Err(HedgeError::Validation(
                "reference price must be positive".into(),
            ));
        }
        let maturity_time = self
            .maturity_time
            .ok_or_else(|| HedgeError::Validation("maturity time is not set".into()))?;
        if maturity_time <= start_time {
            return Err(HedgeError::Validation(
                "maturity must be strictly after the start time".into(),
            ));
        }
        let hedge_type = self
            .hedge_type
            .ok_or_else(|| HedgeError::Validation("hedge type is not set".into()))?;

        Ok(Hedge {
            id,
            farmer_id,
            commodity,
            quantity: self.quantity,
            strike_price: self.strike_price,
            reference_price: self.reference_price,
            start_time,
            maturity_time,
            hedge_type,
            status: HedgeStatus::Active,
            gain_loss: None,
            location: self.location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> HedgeDraft {
        HedgeDraft::new()
            .set_farmer("farmer_1")
            .set_commodity("Soybean")
            .set_quantity(1000)
            .set_strike_price(5000)
            .set_reference_price(4800)
            .set_maturity(TimeStamp::new_with(2030, 1, 1, 0, 0, 0))
            .set_type(HedgeType::Call)
            .set_location("Maharashtra")
    }

    #[test]
    fn finalise_produces_active_hedge() {
        let start = TimeStamp::new_with(2026, 1, 1, 0, 0, 0);
        let hedge = draft().finalise(0, start.clone()).unwrap();

        assert_eq!(hedge.id, 0);
        assert_eq!(hedge.status, HedgeStatus::Active);
        assert_eq!(hedge.gain_loss, None);
        assert_eq!(hedge.start_time, start);
    }

    #[test]
    fn finalise_rejects_zero_quantity() {
        let start = TimeStamp::new_with(2026, 1, 1, 0, 0, 0);
        let res = draft().set_quantity(0).finalise(0, start);

        assert!(matches!(res, Err(HedgeError::Validation(_))));
    }

    #[test]
    fn finalise_rejects_maturity_not_in_future() {
        let start = TimeStamp::new_with(2026, 1, 1, 0, 0, 0);
        let res = draft().set_maturity(start.clone()).finalise(0, start);

        assert!(matches!(res, Err(HedgeError::Validation(_))));
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn hedge_cbor_roundtrip() {
        let start = TimeStamp::new_with(2026, 1, 1, 0, 0, 0);
        let hedge = draft().finalise(7, start).unwrap();

        let encoding = minicbor::to_vec(&hedge).unwrap();
        let decode: Hedge = minicbor::decode(&encoding).unwrap();

        assert_eq!(hedge, decode);
    }
}
