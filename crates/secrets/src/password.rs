//! Random password generation with guaranteed character classes.

use rand::{Rng, RngExt};
use rand::seq::SliceRandom;
use zeroize::Zeroizing;

use crate::error::SecretsError;
use crate::secure::SecureString;

/// One character per class is guaranteed, so four is the floor.
pub const MIN_PASSWORD_LENGTH: usize = 4;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
// No `;`, `=` or quotes: generated passwords are embedded verbatim into
// ADO.NET connection strings.
const SPECIAL: &[u8] = b"!#$%&*+-.?@_";

const CLASSES: [&[u8]; 4] = [UPPER, LOWER, DIGITS, SPECIAL];

/// Generates a random password of `length` characters containing at least one
/// uppercase letter, one lowercase letter, one digit and one special
/// character.
///
/// The working buffer is zeroed when the function returns; the result only
/// ever exists inside a [`SecureString`].
pub fn generate_password(length: usize) -> Result<SecureString, SecretsError> {
    if length < MIN_PASSWORD_LENGTH {
        return Err(SecretsError::PasswordTooShort {
            requested: length,
            minimum: MIN_PASSWORD_LENGTH,
        });
    }

    let mut rng = rand::rng();
    let mut buffer = Zeroizing::new(Vec::with_capacity(length));
    for class in CLASSES {
        buffer.push(pick(&mut rng, class));
    }
    let all: Vec<u8> = CLASSES.concat();
    while buffer.len() < length {
        buffer.push(pick(&mut rng, &all));
    }
    // Shuffle so the guaranteed characters are not always the prefix.
    buffer.shuffle(&mut rng);

    let password = String::from_utf8_lossy(&buffer).into_owned();
    Ok(SecureString::new(password))
}

fn pick(rng: &mut impl Rng, set: &[u8]) -> u8 {
    set[rng.random_range(0..set.len())]
}
