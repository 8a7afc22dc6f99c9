//! Blended payment calculator: how much of a charge the wallet covers and how
//! much goes to the gateway. Pure integer arithmetic on cents.

use super::payment_intent::PaymentMethod;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default ceiling on a single charge or deposit (R$ 10 million).
pub const MAX_PAYMENT_CENTS: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub requested_amount_cents: i64,
    pub available_balance_cents: i64,
    pub use_wallet: bool,
    /// User-chosen ceiling on the wallet portion. `None` means "up to the requested amount".
    pub wallet_cap_cents: Option<i64>,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentSplit {
    pub requested_amount_cents: i64,
    pub wallet_applied_cents: i64,
    pub gateway_amount_cents: i64,
    pub method: PaymentMethod,
    /// Nothing to charge at all: the intent resolves to paid without touching
    /// the ledger or a gateway.
    pub auto_resolve: bool,
}

pub fn compute_split(req: &SplitRequest) -> PaymentSplit {
    let requested = req.requested_amount_cents.max(0);

    let wallet_applied = if req.use_wallet {
        let balance = req.available_balance_cents.max(0);
        let cap = req.wallet_cap_cents.unwrap_or(requested).max(0);
        balance.min(requested).min(cap)
    } else {
        0
    };

    let gateway_amount = requested - wallet_applied;
    let method = if gateway_amount == 0 {
        PaymentMethod::WalletOnly
    } else {
        req.method
    };

    PaymentSplit {
        requested_amount_cents: requested,
        wallet_applied_cents: wallet_applied,
        gateway_amount_cents: gateway_amount,
        method,
        auto_resolve: requested == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn req(requested: i64, balance: i64, use_wallet: bool, cap: Option<i64>) -> SplitRequest {
        SplitRequest {
            requested_amount_cents: requested,
            available_balance_cents: balance,
            use_wallet,
            wallet_cap_cents: cap,
            method: PaymentMethod::Pix,
        }
    }

    #[test]
    fn test_partial_wallet_cover() {
        let split = compute_split(&req(1500, 1000, true, Some(1000)));
        assert_eq!(split.wallet_applied_cents, 1000);
        assert_eq!(split.gateway_amount_cents, 500);
        assert_eq!(split.method, PaymentMethod::Pix);
        assert!(!split.auto_resolve);
    }

    #[test]
    fn test_full_wallet_cover_forces_wallet_only() {
        let split = compute_split(&req(1500, 2000, true, Some(1500)));
        assert_eq!(split.wallet_applied_cents, 1500);
        assert_eq!(split.gateway_amount_cents, 0);
        assert_eq!(split.method, PaymentMethod::WalletOnly);
    }

    #[test]
    fn test_wallet_opt_out_ignores_balance() {
        let split = compute_split(&req(1500, 2000, false, None));
        assert_eq!(split.wallet_applied_cents, 0);
        assert_eq!(split.gateway_amount_cents, 1500);
    }

    #[test]
    fn test_cap_limits_wallet_portion() {
        let split = compute_split(&req(1500, 2000, true, Some(300)));
        assert_eq!(split.wallet_applied_cents, 300);
        assert_eq!(split.gateway_amount_cents, 1200);
    }

    #[test]
    fn test_free_plan_auto_resolves() {
        let split = compute_split(&req(0, 500, true, None));
        assert!(split.auto_resolve);
        assert_eq!(split.wallet_applied_cents, 0);
        assert_eq!(split.gateway_amount_cents, 0);
        assert_eq!(split.method, PaymentMethod::WalletOnly);
    }

    #[test]
    fn test_negative_inputs_clamp_to_zero() {
        let split = compute_split(&req(1000, -50, true, Some(-1)));
        assert_eq!(split.wallet_applied_cents, 0);
        assert_eq!(split.gateway_amount_cents, 1000);
    }

    proptest! {
        #[test]
        fn prop_split_is_exact_and_bounded(
            requested in 0i64..10_000_000,
            balance in 0i64..10_000_000,
            cap in proptest::option::of(0i64..10_000_000),
            use_wallet in any::<bool>(),
        ) {
            let split = compute_split(&req(requested, balance, use_wallet, cap));

            prop_assert_eq!(split.wallet_applied_cents + split.gateway_amount_cents, requested);
            prop_assert!(split.wallet_applied_cents >= 0);
            prop_assert!(split.wallet_applied_cents <= balance.min(requested).min(cap.unwrap_or(requested)));
            prop_assert_eq!(split.gateway_amount_cents == 0, split.method == PaymentMethod::WalletOnly);
            if !use_wallet {
                prop_assert_eq!(split.wallet_applied_cents, 0);
            }
        }
    }
}
