// This module exists because general-purpose RC4 crates come and go; the
// algorithm itself is small enough to own outright, same reasoning lopdf
// gives for vendoring it.
pub struct Rc4 {
    initial_state: [u8; 256],
}

impl Rc4 {
    pub fn new<Key: AsRef<[u8]>>(key: Key) -> Self {
        let key = key.as_ref();
        assert!(!key.is_empty() && key.len() <= 256);

        let mut initial_state = [0_u8; 256];
        for (i, v) in initial_state.iter_mut().enumerate() {
            *v = i as u8;
        }

        let mut j = 0_u8;
        for i in 0..256 {
            j = j.wrapping_add(initial_state[i]).wrapping_add(key[i % key.len()]);
            initial_state.swap(i, j as usize);
        }

        Self { initial_state }
    }

    /// Encrypts/decrypts `input` into `output`. The shorter of the two
    /// determines how many bytes get written.
    pub fn apply_keystream<'i, 'o, Input, Output>(&self, input: Input, output: Output)
    where
        Input: Iterator<Item = &'i u8>,
        Output: Iterator<Item = &'o mut u8>,
    {
        let mut state = self.initial_state;
        let mut i = 0_u8;
        let mut j = 0_u8;
        for (i_byte, o_byte) in input.zip(output) {
            i = i.wrapping_add(1);
            j = j.wrapping_add(state[i as usize]);
            state.swap(i as usize, j as usize);
            let key_byte = state[(state[i as usize].wrapping_add(state[j as usize])) as usize];
            *o_byte = i_byte ^ key_byte;
        }
    }

    pub fn decrypt<Input: AsRef<[u8]>>(&self, input: Input) -> Vec<u8> {
        let input = input.as_ref();
        let mut output = vec![0; input.len()];
        self.apply_keystream(input.iter(), output.iter_mut());
        output
    }

    /// RC4 is symmetric; encryption and decryption are the same operation.
    pub fn encrypt<Input: AsRef<[u8]>>(&self, input: Input) -> Vec<u8> {
        self.decrypt(input)
    }
}

#[cfg(test)]
mod tests {
    use super::Rc4;

    #[test]
    fn matches_known_test_vectors() {
        let cases = [
            (String::from("Key"), String::from("Plaintext"), String::from("BBF316E8D940AF0AD3")),
            (String::from("Wiki"), String::from("pedia"), String::from("1021BF0420")),
        ];

        for (key, plain, cipher) in cases {
            let cipher = cipher.as_bytes();
            let mut cipher_bytes = Vec::with_capacity(cipher.len() / 2);
            for pair in cipher.chunks_exact(2) {
                cipher_bytes.push(u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap());
            }

            let decrypted = Rc4::new(key).decrypt(&cipher_bytes);
            assert_eq!(plain.as_bytes(), &decrypted[..]);
        }
    }

    #[test]
    fn round_trips() {
        let rc4 = Rc4::new(b"a shared key");
        let ciphertext = rc4.encrypt(b"hello, world");
        assert_eq!(rc4.decrypt(&ciphertext), b"hello, world");
    }
}
