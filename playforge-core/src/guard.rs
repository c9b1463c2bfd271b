//! Bootstrap Script Rendering
//!
//! One parameterized template produces the runtime bootstrap for both
//! variants. Every page gets the config prelude; previews add the trial
//! guard, finals strip leftover watermark elements.

use crate::hashing::{GUARD_CONTRACT_TAG, GUARD_VERSION};

/// Attribute marking the injected script so it can be found and replaced.
pub const RUNTIME_SCRIPT_ATTR: &str = "data-playforge-runtime";

pub const LOGICAL_WIDTH: u32 = 1080;
pub const LOGICAL_HEIGHT: u32 = 1920;

pub const OVERLAY_ID: &str = "builder-preview-watermark";
pub const FINISH_PANEL_ID: &str = "builder-preview-finished";
const STYLE_ID: &str = "builder-preview-style";

const SELF_CHECK_INTERVAL_MS: u32 = 1200;
const DEVTOOLS_GAP_PX: u32 = 220;
const DEFAULT_INTERACTION_CAP: u32 = 4;

const PRELUDE: &str = r##"window.__USER_CONFIG__={{CONFIG_JSON}};
if(window.__USER_CONFIG__&&typeof window.__USER_CONFIG__.clickUrl==="string"){window.STORE_URL=window.__USER_CONFIG__.clickUrl;}
window.__PLAYABLE_DIMENSIONS__={width:{{WIDTH}},height:{{HEIGHT}}};
var WATERMARK_ID="{{OVERLAY_ID}}";var FINISH_ID="{{FINISH_ID}}";var STYLE_ID="{{STYLE_ID}}";
function removeWatermarks(){[WATERMARK_ID,FINISH_ID,"watermark","watermark2","watermark3","watermark-overlay"].forEach(function(id){var el=document.getElementById(id);if(el&&el.parentNode){el.parentNode.removeChild(el);}});document.querySelectorAll(".watermark").forEach(function(el){if(el.parentNode){el.parentNode.removeChild(el);}});}
"##;

const FINAL_BODY: &str = r##"function boot(){removeWatermarks();}
"##;

const PREVIEW_BODY: &str = r##"var LOCKED=false;var interactions=0;var cfg=window.__USER_CONFIG__||{};var snapshot=JSON.stringify(cfg);
function ensureStyle(){if(document.getElementById(STYLE_ID))return;var s=document.createElement("style");s.id=STYLE_ID;s.textContent="#"+WATERMARK_ID+"{position:fixed;inset:0;z-index:2147483646;pointer-events:none;display:grid;place-items:center;font:900 42px/1.1 Arial,sans-serif;color:rgba(255,0,0,.28);text-transform:uppercase;transform:rotate(-24deg);white-space:pre;text-align:center;}#"+FINISH_ID+"{position:fixed;inset:0;z-index:2147483647;background:rgba(0,0,0,.82);display:none;align-items:center;justify-content:center;padding:24px;box-sizing:border-box;}#"+FINISH_ID+".show{display:flex;}#"+FINISH_ID+" .msg{max-width:780px;text-align:center;color:#fff;font:800 34px/1.25 Arial,sans-serif;text-transform:uppercase;}";document.head.appendChild(s);}
function ensureOverlay(){if(document.getElementById(WATERMARK_ID))return;var o=document.createElement("div");o.id=WATERMARK_ID;o.textContent="PREVIEW MODE\nPURCHASE TO UNLOCK";document.body.appendChild(o);}
function isBlockedTarget(t){if(!t||!(t instanceof Element))return false;return !!(t.closest("#"+FINISH_ID)||t.closest("#"+WATERMARK_ID));}
function hardStop(reason){if(LOCKED)return;LOCKED=true;document.querySelectorAll("button,input,select,textarea").forEach(function(el){try{el.disabled=true;}catch(_){}});var ui=document.getElementById("ui-layer");if(ui){ui.style.pointerEvents="none";}try{if(window.PIXI&&window.PIXI.Ticker&&window.PIXI.Ticker.shared){window.PIXI.Ticker.shared.stop();}}catch(_){}try{if(window.app&&window.app.ticker&&typeof window.app.ticker.stop==="function"){window.app.ticker.stop();}}catch(_){}var panel=document.getElementById(FINISH_ID);if(!panel){panel=document.createElement("div");panel.id=FINISH_ID;var msg=document.createElement("div");msg.className="msg";msg.textContent="Preview finished. Get the full version to keep playing.";panel.appendChild(msg);document.body.appendChild(panel);}panel.classList.add("show");document.dispatchEvent(new CustomEvent("preview:ended",{detail:{reason:reason||"limit"}}));}
function sha256Hex(str){if(window.crypto&&window.crypto.subtle&&window.TextEncoder){return window.crypto.subtle.digest("SHA-256",new TextEncoder().encode(str)).then(function(buf){return Array.from(new Uint8Array(buf)).map(function(b){return b.toString(16).padStart(2,"0");}).join("");});}return Promise.resolve("");}
function field(v){return v===undefined||v===null?"":String(v);}
function guardPayload(c){return [field(c.game),field(c.themeId),field(c.language),field(c.currency),field(c.startingBalance),field(c.previewMaxInteractions),field(c.isWatermarked),field(c.clickUrl),"{{GUARD_TAG}}"].join("|");}
function validateGuard(c){if(c.guardVer!=="{{GUARD_VERSION}}"||typeof c.guardSig!=="string"||!c.guardSig||typeof c.guardSalt!=="string"){return Promise.resolve(false);}return sha256Hex(guardPayload(c)+"|"+c.guardSalt).then(function(sig){return !!sig&&sig===c.guardSig;});}
function tick(){if(LOCKED)return;interactions+=1;var cap=Number(cfg.previewMaxInteractions||{{DEFAULT_CAP}});if(!Number.isFinite(cap)||cap<1){cap={{DEFAULT_CAP}};}if(interactions>=cap){setTimeout(function(){hardStop("interaction_limit");},120);}}
function blockEscapes(){document.addEventListener("click",function(ev){var a=ev.target instanceof Element?ev.target.closest("a[download],a[href^='blob:']"):null;if(a){ev.preventDefault();ev.stopPropagation();hardStop("download_blocked");}},{capture:true});try{var native=window.open;Object.defineProperty(window,"open",{configurable:false,writable:false,value:function(){hardStop("window_open_blocked");return null;}});if(typeof native==="function"&&String(native).indexOf("[native code]")===-1){hardStop("open_tampered");}}catch(_){}}
function watch(){var removed=0;setInterval(function(){if(LOCKED)return;if(!document.getElementById(WATERMARK_ID)){removed+=1;ensureOverlay();if(removed>=2){hardStop("watermark_removed");}}if(JSON.stringify(window.__USER_CONFIG__)!==snapshot){hardStop("config_mutated");}validateGuard(cfg).then(function(ok){if(!ok){hardStop("guard_invalid");}}).catch(function(){hardStop("guard_error");});if((window.outerWidth-window.innerWidth)>{{DEVTOOLS_GAP}}||(window.outerHeight-window.innerHeight)>{{DEVTOOLS_GAP}}){hardStop("devtools_detected");}},{{CHECK_INTERVAL_MS}});}
function boot(){if(!cfg.isWatermarked){removeWatermarks();return;}try{Object.freeze(cfg);}catch(_){}ensureStyle();ensureOverlay();validateGuard(cfg).then(function(ok){if(!ok){hardStop("guard_invalid_init");return;}blockEscapes();watch();document.addEventListener("pointerdown",function(ev){if(isBlockedTarget(ev.target))return;tick();},{passive:true,capture:true});document.addEventListener("keydown",function(ev){if(LOCKED)return;if(ev.key!=="Enter"&&ev.key!==" "&&ev.key!=="Spacebar")return;if(isBlockedTarget(document.activeElement))return;tick();},{capture:true});}).catch(function(){hardStop("guard_boot_error");});}
"##;

const EPILOGUE: &str = r##"if(document.readyState==="loading"){document.addEventListener("DOMContentLoaded",boot,{once:true});}else{boot();}
"##;

/// Inputs for one rendered bootstrap.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapParams<'a> {
    /// Config literal, already escaped for embedding in a script element.
    pub config_json: &'a str,
    pub preview: bool,
}

pub fn render_bootstrap(params: BootstrapParams<'_>) -> String {
    let body = if params.preview { PREVIEW_BODY } else { FINAL_BODY };
    let source = format!("{PRELUDE}{body}{EPILOGUE}");

    let width = LOGICAL_WIDTH.to_string();
    let height = LOGICAL_HEIGHT.to_string();
    let interval = SELF_CHECK_INTERVAL_MS.to_string();
    let gap = DEVTOOLS_GAP_PX.to_string();
    let cap = DEFAULT_INTERACTION_CAP.to_string();
    let tokens: [(&str, &str); 10] = [
        ("{{WIDTH}}", &width),
        ("{{HEIGHT}}", &height),
        ("{{OVERLAY_ID}}", OVERLAY_ID),
        ("{{FINISH_ID}}", FINISH_PANEL_ID),
        ("{{STYLE_ID}}", STYLE_ID),
        ("{{GUARD_TAG}}", GUARD_CONTRACT_TAG),
        ("{{GUARD_VERSION}}", GUARD_VERSION),
        ("{{CHECK_INTERVAL_MS}}", &interval),
        ("{{DEVTOOLS_GAP}}", &gap),
        ("{{DEFAULT_CAP}}", &cap),
    ];

    // Config goes in last so its contents are never scanned for tokens.
    let mut script = tokens
        .iter()
        .fold(source, |acc, (token, value)| acc.replace(token, value));
    script = script.replacen("{{CONFIG_JSON}}", params.config_json, 1);

    format!("<script {RUNTIME_SCRIPT_ATTR}=\"{GUARD_VERSION}\">(function(){{\n{script}}})();</script>\n")
}
