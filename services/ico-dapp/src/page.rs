//! Server-rendered ICO page.

use alloy_primitives::U256;
use axum::extract::State;
use axum::response::Html;
use ico_api_types::{Notice, RefreshedState, TokenAmount};
use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::AppState;

/// Free tokens granted per unclaimed NFT.
pub(crate) const TOKENS_PER_NFT: u64 = 10;
pub(crate) const MAX_TOTAL_SUPPLY: u64 = 10_000;

/// What the action area of the page shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PageView {
    ConnectWallet,
    Loading,
    Claim { claimable_tokens: U256 },
    Mint,
}

impl PageView {
    pub(crate) fn select(connected: bool, state: &RefreshedState) -> Self {
        if !connected {
            return Self::ConnectWallet;
        }
        if state.loading {
            return Self::Loading;
        }
        let nfts = state.tokens_to_be_claimed.or_zero();
        if nfts.is_zero() {
            Self::Mint
        } else {
            Self::Claim {
                claimable_tokens: nfts.0.saturating_mul(U256::from(TOKENS_PER_NFT)),
            }
        }
    }
}

/// `formatEther`-style rendering: trailing fractional zeros dropped, at
/// least one fractional digit kept.
pub(crate) fn display_ether(amount: TokenAmount) -> String {
    let full = amount.format_ether();
    match full.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                format!("{whole}.0")
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => full,
    }
}

// The mint button stays disabled until the input holds a positive integer.
const SCRIPT: &str = r#"<script>
async function post(path, body) {
  const res = await fetch(path, {
    method: "POST",
    headers: { "content-type": "application/json" },
    body: body === undefined ? undefined : JSON.stringify(body),
  });
  if (!res.ok) { console.error(await res.text()); }
  window.location.reload();
}
function amountChanged(input) {
  document.getElementById("mint-button").disabled = !/^0*[1-9][0-9]*$/.test(input.value);
}
function mint() {
  const amount = document.getElementById("amount").value;
  if (!/^0*[1-9][0-9]*$/.test(amount)) { return; }
  post("/tokens/mint", { amount });
}
setTimeout(() => {
  if (document.activeElement && document.activeElement.id === "amount") { return; }
  window.location.reload();
}, 2000);
</script>"#;

fn action_area(view: &PageView) -> Markup {
    html! {
        @match view {
            PageView::Loading => {
                button { "Loading..." }
            }
            PageView::Claim { claimable_tokens } => {
                div class="description" { (claimable_tokens.to_string()) " Tokens can be claimed!" }
                button onclick="post('/tokens/claim')" { "Claim Tokens" }
            }
            PageView::Mint => {
                input id="amount" type="number" min="1" placeholder="Amount of Tokens"
                    oninput="amountChanged(this)";
                button id="mint-button" disabled onclick="mint()" { "Mint Tokens" }
            }
            PageView::ConnectWallet => {}
        }
    }
}

/// Full page; `notices` are shown once, as the alert box would.
pub(crate) fn render_page(view: &PageView, state: &RefreshedState, notices: &[Notice]) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                title { "Crypto Devs" }
                meta name="description" content="ICO-Dapp";
            }
            body {
                h1 { "Welcome to Crypto Devs ICO!" }
                div class="description" { "You can claim or mint Crypto Dev tokens here" }
                @for notice in notices {
                    div class="notice" { (notice.message) }
                }
                @if *view == PageView::ConnectWallet {
                    button onclick="post('/wallet/connect')" { "Connect your wallet" }
                } @else {
                    div class="description" {
                        "You have minted "
                        (display_ether(state.balance_of_crypto_dev_tokens.or_zero()))
                        " Crypto Dev Tokens"
                    }
                    div class="description" {
                        "Overall "
                        (display_ether(state.tokens_minted.or_zero()))
                        "/" (MAX_TOTAL_SUPPLY) " have been minted!!!"
                    }
                    (action_area(view))
                }
                footer { "Made with " (PreEscaped("&#10084;")) " by Crypto Devs" }
                (PreEscaped(SCRIPT))
            }
        }
    }
}

pub(crate) async fn index(State(state): State<AppState>) -> Html<String> {
    let connected = state.refresher.session().is_connected();
    let snapshot = state.refresher.snapshot();
    let view = PageView::select(connected, &snapshot);
    let notices = state.notices.take_unseen();
    Html(render_page(&view, &snapshot, &notices).into_string())
}
