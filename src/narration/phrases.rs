//! Spoken cue texts (Vietnamese) and the feedback → hint lexicon.

use std::borrow::Cow;

pub const START: &str = "Bắt đầu bài tập. Hãy đứng vào vị trí.";
pub const COMPLETE: &str = "Hoàn thành! Bạn đã làm rất tốt.";
pub const TIMEOUT: &str = "Hết giờ. Hãy nghỉ ngơi.";
pub const STOPPED: &str = "Đã dừng bài tập.";
pub const GOOD: &str = "Tốt lắm!";
pub const HALFWAY: &str = "Đã được một nửa rồi!";
pub const ALMOST_DONE: &str = "Sắp xong rồi!";
pub const LAST_REP: &str = "Rep cuối cùng!";
pub const RELAXATION_INTRO: &str = "Bây giờ chúng ta sẽ nghỉ thư giãn ba phút.";
pub const RELAXATION_START: &str = "Bây giờ hãy thư giãn. Hít thở sâu và đều đặn.";
pub const RELAXATION_COMPLETE: &str = "Xong. Bạn đã nghỉ ngơi đủ rồi.";

/// Everything the session can ask the narrator to say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    SessionStart,
    Completed,
    TimedOut,
    Stopped,
    RepNumber(u32),
    Quarter,
    Halfway,
    AlmostDone,
    LastRep,
    TimeRemaining(u32),
    FormHint(&'static str),
    RelaxationIntro,
    RelaxationStart,
    RelaxationRemaining(u32),
    RelaxationComplete,
}

impl Cue {
    pub fn text(&self) -> Cow<'static, str> {
        match self {
            Cue::SessionStart => Cow::Borrowed(START),
            Cue::Completed => Cow::Borrowed(COMPLETE),
            Cue::TimedOut => Cow::Borrowed(TIMEOUT),
            Cue::Stopped => Cow::Borrowed(STOPPED),
            Cue::RepNumber(n) => Cow::Owned(n.to_string()),
            Cue::Quarter => Cow::Borrowed(GOOD),
            Cue::Halfway => Cow::Borrowed(HALFWAY),
            Cue::AlmostDone => Cow::Borrowed(ALMOST_DONE),
            Cue::LastRep => Cow::Borrowed(LAST_REP),
            Cue::TimeRemaining(secs) => time_remaining(*secs),
            Cue::FormHint(hint) => Cow::Borrowed(hint),
            Cue::RelaxationIntro => Cow::Borrowed(RELAXATION_INTRO),
            Cue::RelaxationStart => Cow::Borrowed(RELAXATION_START),
            Cue::RelaxationRemaining(secs) => relaxation_remaining(*secs),
            Cue::RelaxationComplete => Cow::Borrowed(RELAXATION_COMPLETE),
        }
    }
}

fn time_remaining(secs: u32) -> Cow<'static, str> {
    match secs {
        60 => Cow::Borrowed("Còn một phút"),
        30 => Cow::Borrowed("Còn ba mươi giây"),
        10 => Cow::Borrowed("Còn mười giây"),
        n => Cow::Owned(format!("Còn {n} giây")),
    }
}

fn relaxation_remaining(secs: u32) -> Cow<'static, str> {
    match secs {
        90 => Cow::Borrowed("Còn một phút rưỡi"),
        30 => Cow::Borrowed("Còn ba mươi giây"),
        n => Cow::Owned(format!("Còn {n} giây")),
    }
}

pub mod hints {
    pub const RAISE_HIGHER: &str = "Nâng tay cao hơn nữa";
    pub const STRAIGHTEN_ARMS: &str = "Duỗi thẳng tay";
    pub const LOWER_FULLY: &str = "Hạ tay xuống hẳn";
    pub const BEND_DEEPER: &str = "Gập gối sâu hơn";
    pub const KNEES_BACK: &str = "Đẩy gối ra sau";
    pub const STAND_STRAIGHT: &str = "Đứng thẳng lên";
    pub const RAISE_HEELS: &str = "Nâng gót chân cao hơn";
    pub const KEEP_LEGS_STRAIGHT: &str = "Giữ chân thẳng";
}

/// Substring fragments (localized variants) mapped to a short spoken hint.
/// First match wins, so longer fragments come before their prefixes.
const LEXICON: &[(&[&str], &str)] = &[
    (&["vai chưa đủ", "chưa đủ cao"], hints::RAISE_HIGHER),
    (&["tay cong", "không thẳng tay"], hints::STRAIGHTEN_ARMS),
    (&["chưa xuống đủ", "chưa gập đủ"], hints::BEND_DEEPER),
    (&["chưa xuống", "chưa hạ"], hints::LOWER_FULLY),
    (&["chân cong", "leg bent"], hints::KEEP_LEGS_STRAIGHT),
    (&["gối", "knee"], hints::KNEES_BACK),
    (&["không thẳng", "cong lưng"], hints::STAND_STRAIGHT),
    (&["gót", "heel"], hints::RAISE_HEELS),
];

/// Map a raw feedback line to a spoken hint, if it names a known form error.
pub fn match_error(feedback: &str) -> Option<&'static str> {
    let lowered = feedback.to_lowercase();
    LEXICON
        .iter()
        .find(|(fragments, _)| fragments.iter().any(|f| lowered.contains(f)))
        .map(|(_, hint)| *hint)
}
